pub mod error;
pub mod execute;
pub mod executions;
pub mod handlers;
pub mod middleware;
pub mod queues;
pub mod routes;
pub mod scripts;
pub mod ws;

pub use error::ApiError;
pub use routes::create_router;
pub use ws::{NotificationGateway, WsMessage};
