//! Query compilation core for shardq: lifecycle state machine, validator,
//! relational converter, and the cost-based optimizer with its physical
//! operator model.

pub mod converter;
pub mod explain;
pub mod lifecycle;
pub mod logical_plan;
pub mod optimizer;
pub mod physical_plan;
pub mod rules;
pub mod validator;

pub use converter::*;
pub use explain::*;
pub use lifecycle::*;
pub use logical_plan::*;
pub use optimizer::*;
pub use physical_plan::*;
pub use rules::*;
pub use validator::*;
