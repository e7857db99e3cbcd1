pub mod rack;
pub mod sim;
pub mod ui;
pub mod workload;
