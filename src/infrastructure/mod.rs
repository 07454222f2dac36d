pub mod llm;
pub mod logging;
