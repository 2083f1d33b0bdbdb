//! Declared call shapes for kernel entry points.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// `int`
    Int,
    /// `int**`, a table of row pointers.
    Matrix,
    Void,
}

impl ValueKind {
    fn parse(token: &str) -> Option<Self> {
        let compact: String = token.split_whitespace().collect();
        match compact.as_str() {
            "int" | "c_int" | "i32" => Some(ValueKind::Int),
            "int**" | "matrix" | "*mut*mutc_int" => Some(ValueKind::Matrix),
            "void" | "()" | "" => Some(ValueKind::Void),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Matrix => "int**",
            ValueKind::Void => "void",
        }
    }
}

/// Argument and return shape of an entry point, e.g.
/// `(int, int**, int**, int**) -> void`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct KernelSignature {
    params: Vec<ValueKind>,
    ret: ValueKind,
}

impl KernelSignature {
    pub fn new(params: Vec<ValueKind>, ret: ValueKind) -> Self {
        Self { params, ret }
    }

    /// The one shape every multiply kernel must have.
    pub fn multiply() -> Self {
        Self::new(
            vec![
                ValueKind::Int,
                ValueKind::Matrix,
                ValueKind::Matrix,
                ValueKind::Matrix,
            ],
            ValueKind::Void,
        )
    }

    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    pub fn ret(&self) -> ValueKind {
        self.ret
    }

    pub fn is_multiply(&self) -> bool {
        *self == Self::multiply()
    }
}

impl fmt::Display for KernelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(|p| p.as_str()).collect();
        write!(f, "({}) -> {}", params.join(", "), self.ret.as_str())
    }
}

/// Parses `(a, b, ...) -> r`. A missing `-> r` means `void`.
impl FromStr for KernelSignature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (args, ret) = match s.split_once("->") {
            Some((args, ret)) => (args.trim(), ret.trim()),
            None => (s, "void"),
        };

        let inner = args
            .strip_prefix('(')
            .and_then(|a| a.strip_suffix(')'))
            .ok_or_else(|| format!("expected a parenthesised argument list in `{}`", s))?;

        let params = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner
                .split(',')
                .map(|t| {
                    ValueKind::parse(t)
                        .filter(|k| *k != ValueKind::Void)
                        .ok_or_else(|| format!("unknown argument type `{}`", t.trim()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let ret = ValueKind::parse(ret).ok_or_else(|| format!("unknown return type `{}`", ret))?;

        Ok(Self::new(params, ret))
    }
}
