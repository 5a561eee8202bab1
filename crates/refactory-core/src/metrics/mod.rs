pub mod adapter;
pub mod assembler;
