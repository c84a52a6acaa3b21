pub mod alert;
pub mod heartbeat;
