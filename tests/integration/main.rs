//! Integration test modules.

mod activity_store_test;
mod session_flow_test;
mod sensor_mock;
mod trainer_control_test;
