//! Typed input AST.
//!
//! This is the boundary with the frontend collaborator: declarations arrive
//! in source order, fully typed and constant-folded, diagnostic-clean. The
//! backend never re-validates types.

use crate::value::Width;

/// Resolved C-subset type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// Unsigned 8-bit.
    Char,
    /// 16-bit. Loads and stores only; arithmetic on it is a fatal error.
    Short,
    /// Native 24-bit integer.
    Int,
    /// 24-bit pointer.
    Ptr(Box<Type>),
}

impl Type {
    pub fn size(&self) -> i64 {
        match self {
            Type::Char => 1,
            Type::Short => 2,
            Type::Int | Type::Ptr(_) => 3,
        }
    }

    pub fn width(&self) -> Width {
        match self {
            Type::Char => Width::Byte,
            Type::Short => Width::Word,
            Type::Int | Type::Ptr(_) => Width::Long,
        }
    }

    pub fn char_ptr() -> Type {
        Type::Ptr(Box::new(Type::Char))
    }
}

/// One translation unit.
#[derive(Debug, Clone)]
pub struct Program {
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Local {
        name: String,
        ty: Type,
        init: Option<Expr>,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        label: Option<String>,
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        init: Option<Expr>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    /// Infinite loop; exits only through `break` or `goto`.
    Loop {
        label: Option<String>,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    /// Jump to the entry of the enclosing loop carrying this label.
    Goto(String),
    Return(Option<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement.
    BitNot,
    /// Logical not.
    Not,
    /// Pointer dereference.
    Deref,
    /// Address of an lvalue.
    Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit {
        value: i64,
        ty: Type,
    },
    /// String literal; evaluates to a pointer at its data label.
    StrLit(String),
    /// Resolved local or parameter reference.
    Ident {
        name: String,
        ty: Type,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
        ty: Type,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        ty: Type,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        ty: Type,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
        ty: Type,
    },
}

impl Expr {
    /// Resolved type of the expression.
    pub fn ty(&self) -> Type {
        match self {
            Expr::IntLit { ty, .. }
            | Expr::Ident { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Assign { ty, .. }
            | Expr::Call { ty, .. } => ty.clone(),
            Expr::StrLit(_) => Type::char_ptr(),
        }
    }

    pub fn int(value: i64) -> Expr {
        Expr::IntLit {
            value,
            ty: Type::Int,
        }
    }

    pub fn ident(name: &str, ty: Type) -> Expr {
        Expr::Ident {
            name: name.to_string(),
            ty,
        }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr, ty: Type) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ty,
        }
    }
}
