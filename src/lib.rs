pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod reporter;
pub mod table;
pub mod token;
pub mod tokenizer;
pub mod value;
pub mod vm;
