#[cfg(test)]
mod job_tests;
