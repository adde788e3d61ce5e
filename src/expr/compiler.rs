//! Compiles postfix expressions into register programs.
//!
//! Compilation runs in two passes. The first simulates the stack over the
//! token list and builds a value graph instead of pushing numbers: `dup`
//! and `swap` only move value ids around, identical subexpressions get the
//! same id, and subexpressions over constants are folded. The second pass
//! lowers the graph reachable from the final value into straight-line
//! instructions over row-sized registers, reusing a register once its
//! value has no later reader.

use crate::core::error::{CompileError, CompileResult};
use crate::expr::token::{clip_name, tokenize, BinaryOp, Token, UnaryOp};
use crate::expr::vm;
use std::collections::HashMap;
use std::fmt;

type ValueId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Value {
    Load(usize),
    // Stored as bits so values can be hashed; NaN literals stay distinct.
    Const(u32),
    Unary(UnaryOp, ValueId),
    Binary(BinaryOp, ValueId, ValueId),
    Ternary(ValueId, ValueId, ValueId),
}

impl Value {
    fn args(&self) -> Vec<ValueId> {
        match *self {
            Value::Load(_) | Value::Const(_) => Vec::new(),
            Value::Unary(_, a) => vec![a],
            Value::Binary(_, a, b) => vec![a, b],
            Value::Ternary(c, a, b) => vec![c, a, b],
        }
    }
}

#[derive(Default)]
struct ValueGraph {
    values: Vec<Value>,
    numbering: HashMap<Value, ValueId>,
}

impl ValueGraph {
    fn intern(&mut self, value: Value) -> ValueId {
        if let Some(&id) = self.numbering.get(&value) {
            return id;
        }
        let id = self.values.len();
        self.values.push(value);
        self.numbering.insert(value, id);
        id
    }

    fn constant(&self, id: ValueId) -> Option<f32> {
        match self.values[id] {
            Value::Const(bits) => Some(f32::from_bits(bits)),
            _ => None,
        }
    }

    fn literal(&mut self, value: f32) -> ValueId {
        self.intern(Value::Const(value.to_bits()))
    }

    fn unary(&mut self, op: UnaryOp, a: ValueId) -> ValueId {
        match self.constant(a) {
            Some(c) => self.literal(vm::unary_fn(op)(c)),
            None => self.intern(Value::Unary(op, a)),
        }
    }

    fn binary(&mut self, op: BinaryOp, a: ValueId, b: ValueId) -> ValueId {
        if let (Some(x), Some(y)) = (self.constant(a), self.constant(b)) {
            return self.literal(vm::binary_fn(op)(x, y));
        }
        let (a, b) = if op.is_commutative() && a > b { (b, a) } else { (a, b) };
        self.intern(Value::Binary(op, a, b))
    }

    fn ternary(&mut self, cond: ValueId, a: ValueId, b: ValueId) -> ValueId {
        if let Some(c) = self.constant(cond) {
            return if vm::truthy(c) { a } else { b };
        }
        if a == b {
            return a;
        }
        self.intern(Value::Ternary(cond, a, b))
    }
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// A register holding one row.
    Reg(usize),
    /// A literal broadcast over the row.
    Const(f32),
}

/// One row-wide instruction.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Instr {
    /// Convert the current row of a source clip into `dst`.
    Load { dst: usize, clip: usize },
    Unary {
        op: UnaryOp,
        dst: usize,
        src: Operand,
    },
    Binary {
        op: BinaryOp,
        dst: usize,
        lhs: Operand,
        rhs: Operand,
    },
    Ternary {
        dst: usize,
        cond: Operand,
        lhs: Operand,
        rhs: Operand,
    },
}

/// A compiled expression, reusable across rows, planes and frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    source: String,
    instrs: Vec<Instr>,
    registers: usize,
    result: Operand,
    inputs: Vec<bool>,
}

impl Program {
    /// The expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Instructions in execution order.
    pub fn instructions(&self) -> &[Instr] {
        &self.instrs
    }

    /// Registers needed to run the program.
    pub fn num_registers(&self) -> usize {
        self.registers
    }

    /// Where the final value ends up.
    pub fn result(&self) -> Operand {
        self.result
    }

    /// Whether clip `index` is read at all.
    pub fn uses_clip(&self, index: usize) -> bool {
        self.inputs.get(index).copied().unwrap_or(false)
    }

    /// Evaluate for a single pixel.
    pub fn eval_scalar(&self, inputs: &[f32]) -> f32 {
        let rows: Vec<vm::SourceRow<'_>> = inputs
            .iter()
            .map(|v| vm::SourceRow::F32(std::slice::from_ref(v)))
            .collect();
        let mut machine = vm::Machine::new(self, 1);
        machine.run_row(&rows)[0]
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operand = |o: &Operand| match o {
            Operand::Reg(r) => format!("r{}", r),
            Operand::Const(c) => format!("{}", c),
        };
        for instr in &self.instrs {
            match instr {
                Instr::Load { dst, clip } => {
                    let name = clip_name(*clip).map(String::from).unwrap_or_default();
                    writeln!(f, "r{} = load {}", dst, name)?
                }
                Instr::Unary { op, dst, src } => {
                    writeln!(f, "r{} = {:?} {}", dst, op, operand(src))?
                }
                Instr::Binary { op, dst, lhs, rhs } => {
                    writeln!(f, "r{} = {:?} {} {}", dst, op, operand(lhs), operand(rhs))?
                }
                Instr::Ternary {
                    dst,
                    cond,
                    lhs,
                    rhs,
                } => writeln!(
                    f,
                    "r{} = {} ? {} : {}",
                    dst,
                    operand(cond),
                    operand(lhs),
                    operand(rhs)
                )?,
            }
        }
        write!(f, "ret {}", operand(&self.result))
    }
}

/// Compile `expr` for `num_clips` source clips.
pub fn compile(expr: &str, num_clips: usize) -> CompileResult<Program> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(CompileError::EmptyExpression);
    }

    let mut graph = ValueGraph::default();
    let mut stack: Vec<ValueId> = Vec::new();

    for spanned in &tokens {
        let needed = spanned.token.needs();
        let underflow = |available: usize| CompileError::StackUnderflow {
            token: spanned.text.to_string(),
            position: spanned.position,
            needed,
            available,
        };
        if stack.len() < needed {
            return Err(underflow(stack.len()));
        }
        let top = stack.len().wrapping_sub(1);

        match spanned.token {
            Token::Load(clip) => {
                if clip >= num_clips {
                    return Err(CompileError::UndefinedClip {
                        token: spanned.text.to_string(),
                        position: spanned.position,
                    });
                }
                stack.push(graph.intern(Value::Load(clip)));
            }
            Token::Const(value) => stack.push(graph.literal(value)),
            Token::Dup(n) => stack.push(stack[top - n]),
            Token::Swap(n) => stack.swap(top, top - n),
            Token::Unary(op) => {
                let a = stack.pop().ok_or_else(|| underflow(0))?;
                stack.push(graph.unary(op, a));
            }
            Token::Binary(op) => {
                let mut args = stack.split_off(stack.len() - 2).into_iter();
                let (Some(a), Some(b)) = (args.next(), args.next()) else {
                    return Err(underflow(stack.len()));
                };
                stack.push(graph.binary(op, a, b));
            }
            Token::Ternary => {
                let mut args = stack.split_off(stack.len() - 3).into_iter();
                let (Some(c), Some(a), Some(b)) = (args.next(), args.next(), args.next()) else {
                    return Err(underflow(stack.len()));
                };
                stack.push(graph.ternary(c, a, b));
            }
        }
    }

    match stack.as_slice() {
        [root] => Ok(lower(expr, &graph, *root, num_clips)),
        rest => Err(CompileError::UnconsumedValues(rest.len())),
    }
}

fn lower(source: &str, graph: &ValueGraph, root: ValueId, num_clips: usize) -> Program {
    // Arguments are always interned before their users, so ascending ids
    // are a valid evaluation order.
    let mut reachable = vec![false; graph.values.len()];
    let mut pending = vec![root];
    while let Some(id) = pending.pop() {
        if !reachable[id] {
            reachable[id] = true;
            pending.extend(graph.values[id].args());
        }
    }
    let order: Vec<ValueId> = (0..graph.values.len())
        .filter(|&id| reachable[id] && graph.constant(id).is_none())
        .collect();

    let mut last_use: HashMap<ValueId, usize> = HashMap::new();
    for (pos, &id) in order.iter().enumerate() {
        for arg in graph.values[id].args() {
            last_use.insert(arg, pos);
        }
    }

    let mut inputs = vec![false; num_clips];
    let mut assigned: HashMap<ValueId, usize> = HashMap::new();
    let mut free: Vec<usize> = Vec::new();
    let mut registers = 0usize;
    let mut instrs = Vec::with_capacity(order.len());

    for (pos, &id) in order.iter().enumerate() {
        let operand = |v: ValueId| match graph.constant(v) {
            Some(c) => Operand::Const(c),
            None => Operand::Reg(assigned.get(&v).copied().unwrap_or_default()),
        };

        // The destination is allocated before sources are released, so an
        // instruction never writes a register it also reads.
        let dst = free.pop().unwrap_or_else(|| {
            registers += 1;
            registers - 1
        });

        instrs.push(match graph.values[id] {
            Value::Load(clip) => {
                inputs[clip] = true;
                Instr::Load { dst, clip }
            }
            Value::Unary(op, a) => Instr::Unary {
                op,
                dst,
                src: operand(a),
            },
            Value::Binary(op, a, b) => Instr::Binary {
                op,
                dst,
                lhs: operand(a),
                rhs: operand(b),
            },
            Value::Ternary(c, a, b) => Instr::Ternary {
                dst,
                cond: operand(c),
                lhs: operand(a),
                rhs: operand(b),
            },
            Value::Const(_) => continue,
        });
        assigned.insert(id, dst);

        let mut args = graph.values[id].args();
        args.dedup();
        args.sort_unstable();
        args.dedup();
        for arg in args {
            if arg != root && last_use.get(&arg) == Some(&pos) {
                if let Some(&reg) = assigned.get(&arg) {
                    free.push(reg);
                }
            }
        }
    }

    let result = match graph.constant(root) {
        Some(c) => Operand::Const(c),
        None => Operand::Reg(assigned.get(&root).copied().unwrap_or_default()),
    };

    Program {
        source: source.to_string(),
        instrs,
        registers,
        result,
        inputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn eval(expr: &str, inputs: &[f32]) -> f32 {
        compile(expr, inputs.len()).unwrap().eval_scalar(inputs)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("x 2 *", &[58.0]), 116.0);
        assert_eq!(eval("x 2 /", &[57.0]), 28.5);
        assert_eq!(eval("2 x pow", &[6.0]), 64.0);
        assert_eq!(eval("2 x swap /", &[58.0]), 29.0);
        assert_eq!(eval("x y -", &[10.0, 3.0]), 7.0);
    }

    #[test]
    fn test_stack_addressing() {
        let xyz = [10.0, 2.0, 3.0];
        assert_eq!(eval("x y z swap2 * +", &xyz), 23.0);
        assert_eq!(eval("x y z swap1 * +", &xyz), 16.0);
        assert_eq!(eval("x dup0 dup1 dup2 y swap3 z * + + swap / +", &xyz), 35.0);
    }

    #[test]
    fn test_logic_and_ternary() {
        assert_eq!(eval("x y and", &[8.0, 7.0]), 1.0);
        assert_eq!(eval("x y xor", &[8.0, 7.0]), 0.0);
        assert_eq!(eval("x not", &[58.0]), 0.0);
        assert_eq!(eval("x not not", &[58.0]), 1.0);
        assert_eq!(eval("z x y ?", &[100.0, 200.0, 0.0]), 200.0);
        assert_eq!(eval("z x y ?", &[100.0, 200.0, 1.0]), 100.0);
        assert_eq!(eval("z not x y ?", &[100.0, 200.0, 0.0]), 100.0);
    }

    #[test]
    fn test_ieee_semantics() {
        assert_eq!(eval("x 0 /", &[1.0]), f32::INFINITY);
        assert_eq!(eval("x log", &[0.0]), f32::NEG_INFINITY);
        assert!(eval("x sqrt", &[-1.0]).is_nan());
    }

    #[test]
    fn test_self_cancel_is_zero() {
        let program = compile("x dup -", 1).unwrap();
        // dup shares the loaded value, so only one load is emitted.
        let loads = program
            .instructions()
            .iter()
            .filter(|i| matches!(i, Instr::Load { .. }))
            .count();
        assert_eq!(loads, 1);
        assert_eq!(program.eval_scalar(&[123.0]), 0.0);
    }

    #[test]
    fn test_constant_folding() {
        let program = compile("1 2 + 4 *", 0).unwrap();
        assert!(program.instructions().is_empty());
        assert_eq!(program.result(), Operand::Const(12.0));

        let program = compile("1 x y ?", 2).unwrap();
        assert_eq!(program.instructions().len(), 1);
        assert!(!program.uses_clip(1));
    }

    #[test]
    fn test_common_subexpressions_shared() {
        let program = compile("x y + y x + *", 2).unwrap();
        // load x, load y, add, mul
        assert_eq!(program.instructions().len(), 4);
        assert_eq!(program.eval_scalar(&[1.0, 2.0]), 9.0);
    }

    #[test]
    fn test_registers_are_reused() {
        let program = compile("x 1 + 2 * 3 - 4 / sqrt", 1).unwrap();
        assert!(program.num_registers() <= 2);
        assert_eq!(program.eval_scalar(&[5.0]), 1.5);
    }

    #[test]
    fn test_compile_errors() {
        assert_eq!(compile("", 1).unwrap_err(), CompileError::EmptyExpression);
        assert_eq!(compile("   ", 1).unwrap_err(), CompileError::EmptyExpression);
        assert_eq!(compile("x x", 1).unwrap_err(), CompileError::UnconsumedValues(2));
        assert!(matches!(
            compile("x +", 1).unwrap_err(),
            CompileError::StackUnderflow {
                needed: 2,
                available: 1,
                position: 1,
                ..
            }
        ));
        assert!(matches!(
            compile("x dup1", 1).unwrap_err(),
            CompileError::StackUnderflow { .. }
        ));
        assert!(matches!(
            compile("x swap", 1).unwrap_err(),
            CompileError::StackUnderflow { .. }
        ));
        assert!(matches!(
            compile("x y +", 1).unwrap_err(),
            CompileError::UndefinedClip { position: 1, .. }
        ));
        assert!(matches!(
            compile("x bogus", 1).unwrap_err(),
            CompileError::InvalidToken { .. }
        ));
    }

    #[test]
    fn test_huge_stack_indices_are_errors() {
        assert!(matches!(
            compile("x dup4294967295", 1).unwrap_err(),
            CompileError::StackUnderflow { .. }
        ));
        assert!(matches!(
            compile("x swap4294967295", 1).unwrap_err(),
            CompileError::StackUnderflow { .. }
        ));
        for program in ["x dup18446744073709551615", "x swap18446744073709551615"] {
            assert!(matches!(
                compile(program, 1).unwrap_err(),
                CompileError::InvalidToken { position: 1, .. }
            ));
        }
    }

    #[test]
    fn test_display_listing() {
        let listing = compile("x 2 *", 1).unwrap().to_string();
        assert!(listing.contains("load x"));
        assert!(listing.ends_with("ret r1"));
    }

    // Straightforward stack interpreter used as the reference.
    fn interpret(expr: &str, inputs: &[f32]) -> Option<f32> {
        let mut stack: Vec<f32> = Vec::new();
        for spanned in tokenize(expr).ok()? {
            let top = stack.len().checked_sub(1);
            match spanned.token {
                Token::Load(n) => stack.push(*inputs.get(n)?),
                Token::Const(v) => stack.push(v),
                Token::Dup(n) => stack.push(stack[top?.checked_sub(n)?]),
                Token::Swap(n) => {
                    let t = top?;
                    stack.swap(t, t.checked_sub(n)?)
                }
                Token::Unary(op) => {
                    let a = stack.pop()?;
                    stack.push(vm::unary_fn(op)(a));
                }
                Token::Binary(op) => {
                    let b = stack.pop()?;
                    let a = stack.pop()?;
                    stack.push(vm::binary_fn(op)(a, b));
                }
                Token::Ternary => {
                    let b = stack.pop()?;
                    let a = stack.pop()?;
                    let c = stack.pop()?;
                    stack.push(if vm::truthy(c) { a } else { b });
                }
            }
        }
        (stack.len() == 1).then(|| stack[0])
    }

    fn word() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("x".to_string()),
            Just("y".to_string()),
            (0u8..10).prop_map(|v| v.to_string()),
            Just("+".to_string()),
            Just("-".to_string()),
            Just("*".to_string()),
            Just("max".to_string()),
            Just("<".to_string()),
            Just("abs".to_string()),
            Just("?".to_string()),
            (0usize..3).prop_map(|n| format!("dup{}", n)),
            (1usize..3).prop_map(|n| format!("swap{}", n)),
        ]
    }

    proptest! {
        #[test]
        fn compiled_matches_stack_interpreter(
            words in prop::collection::vec(word(), 1..12),
            x in -100.0f32..100.0,
            y in -100.0f32..100.0,
        ) {
            let expr = words.join(" ");
            let expected = interpret(&expr, &[x, y]);
            match compile(&expr, 2) {
                Ok(program) => {
                    let expected = expected.expect("interpreter rejected a compiled program");
                    let got = program.eval_scalar(&[x, y]);
                    prop_assert!(got == expected || (got.is_nan() && expected.is_nan()),
                        "{}: {} != {}", expr, got, expected);
                }
                Err(_) => prop_assert!(expected.is_none()),
            }
        }
    }
}
