pub mod accessibility;
pub mod capture;
pub mod config;
pub mod device;
pub mod executor;
pub mod llm;
pub mod ocr;
pub mod orchestrator;
pub mod screen;
pub mod types;
