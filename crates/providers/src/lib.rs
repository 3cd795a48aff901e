pub mod siliconflow;
