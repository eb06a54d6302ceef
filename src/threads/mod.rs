pub mod chord;
pub mod join;
pub mod tcp_service;
