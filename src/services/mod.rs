pub mod diffusion;
pub mod draft;
pub mod process;
pub mod queue;
pub mod storage;
pub mod text_gen;
pub mod vision;
pub mod worker;
