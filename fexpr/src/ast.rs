//! AST for the rendered artifact notation.

/// Binary operators, lowest to highest precedence handled in the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Ident(String),
    /// `base.field`
    Member(Box<Expr>, String),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : else`
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// `(p1, p2, ...) => body`
    Arrow(Vec<String>, Box<Expr>),
}

/// A parsed artifact: an ordered list of `name = <expr>` top-level bindings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub bindings: Vec<(String, Expr)>,
}

impl Module {
    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }
}
