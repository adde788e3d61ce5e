//! Tokenizer for postfix expressions.

use crate::core::error::{CompileError, CompileResult};
use std::fmt;

/// Highest number of source clips an expression can reference.
pub const MAX_CLIPS: usize = 26;

/// One-operand operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum UnaryOp {
    Sqrt,
    Abs,
    Exp,
    Log,
    Sin,
    Cos,
    Not,
}

/// Two-operand operators. The deeper operand is the left-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    /// Whether operand order never changes the result.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::Eq | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }
}

/// A parsed token.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub enum Token {
    /// Push the pixel of source clip `n`.
    Load(usize),
    /// Push a literal.
    Const(f32),
    /// Push a copy of the value `n` slots below the top.
    Dup(usize),
    /// Exchange the top with the value `n` slots below it.
    Swap(usize),
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// `cond a b ?`: `a` where `cond > 0`, else `b`.
    Ternary,
}

impl Token {
    /// Values the token needs on the stack.
    pub fn needs(&self) -> usize {
        match self {
            Token::Load(_) | Token::Const(_) => 0,
            Token::Dup(n) | Token::Swap(n) => n.saturating_add(1),
            Token::Unary(_) => 1,
            Token::Binary(_) => 2,
            Token::Ternary => 3,
        }
    }
}

/// Clip index named by a variable token: `x`, `y`, `z`, then `a`..`w`.
pub fn clip_index(name: &str) -> Option<usize> {
    let mut chars = name.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    match c {
        'x' => Some(0),
        'y' => Some(1),
        'z' => Some(2),
        'a'..='w' => Some(3 + (c as usize - 'a' as usize)),
        _ => None,
    }
}

/// Variable name of clip `index`.
pub fn clip_name(index: usize) -> Option<char> {
    match index {
        0 => Some('x'),
        1 => Some('y'),
        2 => Some('z'),
        3..=25 => char::from_u32('a' as u32 + (index - 3) as u32),
        _ => None,
    }
}

fn stack_index(word: &str, prefix: &str, default: usize) -> Option<usize> {
    let rest = word.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some(default);
    }
    if !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Indices past u32 are rejected as illegal tokens.
    rest.parse::<u32>().ok().map(|n| n as usize)
}

fn parse_word(word: &str) -> Option<Token> {
    let token = match word {
        "+" => Token::Binary(BinaryOp::Add),
        "-" => Token::Binary(BinaryOp::Sub),
        "*" => Token::Binary(BinaryOp::Mul),
        "/" => Token::Binary(BinaryOp::Div),
        "pow" => Token::Binary(BinaryOp::Pow),
        "min" => Token::Binary(BinaryOp::Min),
        "max" => Token::Binary(BinaryOp::Max),
        "<" => Token::Binary(BinaryOp::Lt),
        ">" => Token::Binary(BinaryOp::Gt),
        "<=" => Token::Binary(BinaryOp::Le),
        ">=" => Token::Binary(BinaryOp::Ge),
        "=" => Token::Binary(BinaryOp::Eq),
        "and" => Token::Binary(BinaryOp::And),
        "or" => Token::Binary(BinaryOp::Or),
        "xor" => Token::Binary(BinaryOp::Xor),
        "sqrt" => Token::Unary(UnaryOp::Sqrt),
        "abs" => Token::Unary(UnaryOp::Abs),
        "exp" => Token::Unary(UnaryOp::Exp),
        "log" => Token::Unary(UnaryOp::Log),
        "sin" => Token::Unary(UnaryOp::Sin),
        "cos" => Token::Unary(UnaryOp::Cos),
        "not" => Token::Unary(UnaryOp::Not),
        "?" => Token::Ternary,
        _ => {
            if let Some(clip) = clip_index(word) {
                return Some(Token::Load(clip));
            }
            if let Some(n) = stack_index(word, "dup", 0) {
                return Some(Token::Dup(n));
            }
            if let Some(n) = stack_index(word, "swap", 1) {
                return Some(Token::Swap(n));
            }
            return word.parse::<f32>().ok().map(Token::Const);
        }
    };
    Some(token)
}

/// A token with its source text and position.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct Spanned<'a> {
    pub token: Token,
    pub text: &'a str,
    pub position: usize,
}

/// Split an expression on whitespace and parse every token.
pub fn tokenize(expr: &str) -> CompileResult<Vec<Spanned<'_>>> {
    expr.split_whitespace()
        .enumerate()
        .map(|(position, text)| {
            parse_word(text)
                .map(|token| Spanned {
                    token,
                    text,
                    position,
                })
                .ok_or_else(|| CompileError::InvalidToken {
                    token: text.to_string(),
                    position,
                })
        })
        .collect()
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Load(n) => match clip_name(*n) {
                Some(c) => write!(f, "{}", c),
                None => write!(f, "src{}", n),
            },
            Token::Const(v) => write!(f, "{}", v),
            Token::Dup(n) => write!(f, "dup{}", n),
            Token::Swap(n) => write!(f, "swap{}", n),
            Token::Unary(op) => write!(f, "{:?}", op),
            Token::Binary(op) => write!(f, "{:?}", op),
            Token::Ternary => write!(f, "?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variables() {
        assert_eq!(clip_index("x"), Some(0));
        assert_eq!(clip_index("z"), Some(2));
        assert_eq!(clip_index("a"), Some(3));
        assert_eq!(clip_index("w"), Some(25));
        assert_eq!(clip_index("xy"), None);
        assert_eq!(clip_name(25), Some('w'));
        assert_eq!(clip_name(26), None);
    }

    #[test]
    fn test_stack_tokens() {
        let tokens = tokenize("dup dup2 swap swap3").unwrap();
        let kinds: Vec<Token> = tokens.iter().map(|t| t.token).collect();
        assert_eq!(
            kinds,
            vec![Token::Dup(0), Token::Dup(2), Token::Swap(1), Token::Swap(3)]
        );
        assert_eq!(tokens[3].position, 3);
    }

    #[test]
    fn test_literals_and_ops() {
        let tokens = tokenize("  0.5\t-2 1e3 + ? not  ").unwrap();
        assert_eq!(tokens[0].token, Token::Const(0.5));
        assert_eq!(tokens[1].token, Token::Const(-2.0));
        assert_eq!(tokens[2].token, Token::Const(1000.0));
        assert_eq!(tokens[3].token, Token::Binary(BinaryOp::Add));
        assert_eq!(tokens[4].token, Token::Ternary);
        assert_eq!(tokens[5].token, Token::Unary(UnaryOp::Not));
    }

    #[test]
    fn test_invalid_tokens() {
        for bad in [
            "dupx",
            "swap-1",
            "foo",
            "1.2.3",
            "dup18446744073709551615",
            "swap18446744073709551615",
            "dup4294967296",
        ] {
            let err = tokenize(&format!("x {}", bad)).unwrap_err();
            assert_eq!(
                err,
                CompileError::InvalidToken {
                    token: bad.to_string(),
                    position: 1
                }
            );
        }
    }

    #[test]
    fn test_needs() {
        assert_eq!(Token::Dup(0).needs(), 1);
        assert_eq!(Token::Swap(2).needs(), 3);
        assert_eq!(Token::Ternary.needs(), 3);
        assert_eq!(Token::Dup(usize::MAX).needs(), usize::MAX);
        assert_eq!(Token::Swap(usize::MAX).needs(), usize::MAX);
    }
}
