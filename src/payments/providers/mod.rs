pub mod paymongo;
pub mod xendit;

pub use paymongo::{PaymongoConfig, PaymongoProvider};
pub use xendit::{XenditConfig, XenditProvider};
