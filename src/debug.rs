use super::value::Function;

#[cfg(feature = "debug-bytecode")]
pub fn debug_bytecode(function: &Function) {
    print!("{:?}", function);
}

#[cfg(not(feature = "debug-bytecode"))]
pub fn debug_bytecode(_: &Function) {}
