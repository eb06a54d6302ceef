pub static REQUEST_TIMEOUT_MILLIS: u64 = 3_000;
pub static CONNECTION_RETRY_UPON_FAILURE_MILLIS: u64 = 100;
pub static MAX_CONNECTION_RETRIES: u64 = 15;

pub static MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
