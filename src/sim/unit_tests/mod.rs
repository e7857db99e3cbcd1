#[cfg(test)]
mod log_tests;
