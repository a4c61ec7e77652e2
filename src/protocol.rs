pub mod output_management;
pub mod output_power_management;
