//! Row-at-a-time evaluation of compiled programs.

use crate::core::frame::Sample;
use crate::expr::compiler::{Instr, Operand, Program};
use crate::expr::token::{BinaryOp, UnaryOp};
use std::mem;

/// Truth test shared by the logical operators and `?`.
#[inline]
pub fn truthy(v: f32) -> bool {
    v > 0.0
}

#[inline]
fn flag(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Implementation of a one-operand operator.
pub fn unary_fn(op: UnaryOp) -> fn(f32) -> f32 {
    match op {
        UnaryOp::Sqrt => f32::sqrt,
        UnaryOp::Abs => f32::abs,
        UnaryOp::Exp => f32::exp,
        UnaryOp::Log => f32::ln,
        UnaryOp::Sin => f32::sin,
        UnaryOp::Cos => f32::cos,
        UnaryOp::Not => |a| flag(!truthy(a)),
    }
}

/// Implementation of a two-operand operator; `a` is the deeper operand.
pub fn binary_fn(op: BinaryOp) -> fn(f32, f32) -> f32 {
    match op {
        BinaryOp::Add => |a, b| a + b,
        BinaryOp::Sub => |a, b| a - b,
        BinaryOp::Mul => |a, b| a * b,
        BinaryOp::Div => |a, b| a / b,
        BinaryOp::Pow => f32::powf,
        BinaryOp::Min => |a, b| if a < b { a } else { b },
        BinaryOp::Max => |a, b| if b < a { a } else { b },
        BinaryOp::Lt => |a, b| flag(a < b),
        BinaryOp::Gt => |a, b| flag(a > b),
        BinaryOp::Le => |a, b| flag(a <= b),
        BinaryOp::Ge => |a, b| flag(a >= b),
        BinaryOp::Eq => |a, b| flag(a == b),
        BinaryOp::And => |a, b| flag(truthy(a) && truthy(b)),
        BinaryOp::Or => |a, b| flag(truthy(a) || truthy(b)),
        BinaryOp::Xor => |a, b| flag(truthy(a) != truthy(b)),
    }
}

/// One row of a source plane.
#[derive(Debug, Clone, Copy)]
pub enum SourceRow<'a> {
    /// 8-bit integer samples.
    U8(&'a [u8]),
    /// 9 to 16-bit integer samples.
    U16(&'a [u16]),
    /// Single precision float samples.
    F32(&'a [f32]),
}

impl SourceRow<'_> {
    fn load_into(&self, dst: &mut [f32]) {
        match self {
            SourceRow::U8(src) => dst.iter_mut().zip(src.iter()).for_each(|(d, &s)| *d = s as f32),
            SourceRow::U16(src) => dst.iter_mut().zip(src.iter()).for_each(|(d, &s)| *d = s as f32),
            SourceRow::F32(src) => {
                let n = dst.len().min(src.len());
                dst[..n].copy_from_slice(&src[..n]);
            }
        }
    }
}

enum Src<'a> {
    Row(&'a [f32]),
    Splat(f32),
}

impl Src<'_> {
    #[inline(always)]
    fn at(&self, i: usize) -> f32 {
        match self {
            Src::Row(row) => row[i],
            Src::Splat(v) => *v,
        }
    }
}

/// Output sample conversion.
pub trait Store: Sample {
    /// Convert one computed value; `max` is the largest integer code.
    fn store(value: f32, max: f32) -> Self;
}

/// Round half to even and clamp to `[0, max]`. NaN maps to 0.
#[inline]
pub fn quantize(value: f32, max: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.round_ties_even().clamp(0.0, max)
}

impl Store for u8 {
    #[inline]
    fn store(value: f32, max: f32) -> Self {
        quantize(value, max) as u8
    }
}

impl Store for u16 {
    #[inline]
    fn store(value: f32, max: f32) -> Self {
        quantize(value, max) as u16
    }
}

impl Store for f32 {
    #[inline]
    fn store(value: f32, _max: f32) -> Self {
        value
    }
}

/// Register file for running one program over rows of a fixed width.
///
/// Not shared between threads; each frame evaluation builds its own.
pub struct Machine<'p> {
    program: &'p Program,
    registers: Vec<Vec<f32>>,
    result: Vec<f32>,
}

impl<'p> Machine<'p> {
    /// Allocate registers for rows of `width` samples.
    pub fn new(program: &'p Program, width: usize) -> Self {
        Self {
            program,
            registers: vec![vec![0.0; width]; program.num_registers()],
            result: vec![0.0; width],
        }
    }

    fn operand(&self, operand: Operand) -> Src<'_> {
        match operand {
            Operand::Reg(r) => Src::Row(&self.registers[r]),
            Operand::Const(c) => Src::Splat(c),
        }
    }

    /// Run the program over one row and return the computed values.
    ///
    /// `sources[i]` is the row of clip `i`; rows of unused clips are ignored.
    pub fn run_row(&mut self, sources: &[SourceRow<'_>]) -> &[f32] {
        let program = self.program;
        for instr in program.instructions() {
            match *instr {
                Instr::Load { dst, clip } => {
                    if let Some(src) = sources.get(clip) {
                        src.load_into(&mut self.registers[dst]);
                    }
                }
                Instr::Unary { op, dst, src } => {
                    let mut out = mem::take(&mut self.registers[dst]);
                    let f = unary_fn(op);
                    match self.operand(src) {
                        Src::Row(a) => out.iter_mut().zip(a).for_each(|(o, &a)| *o = f(a)),
                        Src::Splat(a) => out.fill(f(a)),
                    }
                    self.registers[dst] = out;
                }
                Instr::Binary { op, dst, lhs, rhs } => {
                    let mut out = mem::take(&mut self.registers[dst]);
                    let f = binary_fn(op);
                    match (self.operand(lhs), self.operand(rhs)) {
                        (Src::Row(a), Src::Row(b)) => out
                            .iter_mut()
                            .zip(a.iter().zip(b))
                            .for_each(|(o, (&a, &b))| *o = f(a, b)),
                        (a, b) => out
                            .iter_mut()
                            .enumerate()
                            .for_each(|(i, o)| *o = f(a.at(i), b.at(i))),
                    }
                    self.registers[dst] = out;
                }
                Instr::Ternary {
                    dst,
                    cond,
                    lhs,
                    rhs,
                } => {
                    let mut out = mem::take(&mut self.registers[dst]);
                    let (c, a, b) = (self.operand(cond), self.operand(lhs), self.operand(rhs));
                    out.iter_mut().enumerate().for_each(|(i, o)| {
                        *o = if truthy(c.at(i)) { a.at(i) } else { b.at(i) };
                    });
                    self.registers[dst] = out;
                }
            }
        }

        match program.result() {
            Operand::Reg(r) => &self.registers[r],
            Operand::Const(c) => {
                self.result.fill(c);
                &self.result
            }
        }
    }

    /// Run the program over one row and store the result into `dst`.
    pub fn eval_row<T: Store>(&mut self, sources: &[SourceRow<'_>], dst: &mut [T], max: f32) {
        let values = self.run_row(sources);
        dst.iter_mut()
            .zip(values)
            .for_each(|(d, &v)| *d = T::store(v, max));
    }
}
