//! Event bus carrying job lifecycle events to live connections.

mod bus;
mod types;

pub use bus::{EventBus, EventReceiver, EventSender};
pub use types::{
    session_topic, unix_timestamp, JobEvent, StepStatus, GLOBAL_TOPIC, JOB_EVENTS_TOPIC,
};
