//! Postfix expression engine used by the `Expr` filter.
//!
//! Expressions are compiled once per plane and evaluated a row at a time:
//!
//! ```
//! use framegraph::expr::{compile, Machine, SourceRow};
//!
//! let program = compile("x y + 2 /", 2).unwrap();
//! let mut machine = Machine::new(&program, 3);
//! let out = machine.run_row(&[SourceRow::U8(&[0, 10, 255]), SourceRow::U8(&[2, 10, 255])]);
//! assert_eq!(out, &[1.0, 10.0, 255.0]);
//! ```

pub mod compiler;
pub mod token;
pub mod vm;

pub use compiler::{compile, Instr, Operand, Program};
pub use token::{BinaryOp, Token, UnaryOp, MAX_CLIPS};
pub use vm::{quantize, Machine, SourceRow, Store};
