pub mod cpu;

pub use cpu::ReferencePrimitive;
