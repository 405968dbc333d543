pub mod asset;
pub mod loaders;
pub mod mcq;
pub mod unit_result;
pub mod work_unit;

pub use asset::{AssetState, RemoteAsset};
pub use loaders::{load_all_units, load_api_keys};
pub use mcq::{Difficulty, Mcq, McqDraft, Provenance};
pub use unit_result::{UnitResult, UnitStatus};
pub use work_unit::WorkUnit;
