pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
pub const REQUIRED_TX_FIELDS: [&str; 3] = ["sender", "recipient", "amount"];
