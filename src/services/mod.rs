//! 业务能力层
//!
//! 每个服务只描述"我能做什么"，不关心调用顺序

pub mod output_store;
pub mod preprocessor;
pub mod prompt;
pub mod response_parser;
pub mod retry;
pub mod upload_gate;

pub use output_store::{inventory, InventoryReport, OutputStore, SubjectInventory};
pub use preprocessor::{PreparedDocument, Preprocessor};
pub use response_parser::{parse_response, ParseStrategy, ParsedBatch};
pub use retry::{Escalation, RetryPolicy};
pub use upload_gate::{AssetGuard, AssetSlot, UploadGate};
