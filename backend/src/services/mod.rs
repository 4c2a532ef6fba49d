pub mod archive;
pub mod diagnostics;
pub mod dispatch;
pub mod documents;
pub mod notify;
pub mod pipeline;
