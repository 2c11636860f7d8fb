//! Vesper core types: interned strings shared by the compiler and runtime.

pub mod string;
