//! Compile a built-in sample program and dump the generated assembly.
//!
//! The frontend is an external collaborator, so this driver carries a few
//! hand-built ASTs that exercise the backend end to end.

use bumpalo::Bump;
use clap::Parser;

use ez80cc::{BinOp, CodegenSession, Compiler, Expr, Function, Param, Program, Stmt, Type};

#[derive(Parser)]
#[command(name = "asmdump", about = "Dump generated eZ80 assembly for a sample program")]
struct Args {
    /// Sample to compile: add, max, count, strings
    #[arg(default_value = "add")]
    sample: String,

    /// Print session statistics to stderr after compiling
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let program = match args.sample.as_str() {
        "add" => sample_add(),
        "max" => sample_max(),
        "count" => sample_count(),
        "strings" => sample_strings(),
        other => {
            eprintln!("unknown sample '{other}' (expected add, max, count or strings)");
            std::process::exit(2);
        }
    };

    let arena = Bump::new();
    let session = CodegenSession::new(&arena);
    match Compiler::new(&session).compile(&program) {
        Ok(asm) => {
            print!("{asm}");
            if args.verbose {
                eprintln!("{}", session.stats());
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

/// `int add(int x, int y) { return x + y; }`
fn sample_add() -> Program {
    Program {
        functions: vec![Function {
            name: "add".to_string(),
            ret: Type::Int,
            params: vec![
                Param {
                    name: "x".to_string(),
                    ty: Type::Int,
                },
                Param {
                    name: "y".to_string(),
                    ty: Type::Int,
                },
            ],
            body: vec![Stmt::Return(Some(Expr::binary(
                BinOp::Add,
                Expr::ident("x", Type::Int),
                Expr::ident("y", Type::Int),
                Type::Int,
            )))],
        }],
    }
}

/// `int max(int a, int b) { if (a > b) return a; return b; }`
fn sample_max() -> Program {
    Program {
        functions: vec![Function {
            name: "max".to_string(),
            ret: Type::Int,
            params: vec![
                Param {
                    name: "a".to_string(),
                    ty: Type::Int,
                },
                Param {
                    name: "b".to_string(),
                    ty: Type::Int,
                },
            ],
            body: vec![
                Stmt::If {
                    cond: Expr::binary(
                        BinOp::Gt,
                        Expr::ident("a", Type::Int),
                        Expr::ident("b", Type::Int),
                        Type::Int,
                    ),
                    then_body: vec![Stmt::Return(Some(Expr::ident("a", Type::Int)))],
                    else_body: None,
                },
                Stmt::Return(Some(Expr::ident("b", Type::Int))),
            ],
        }],
    }
}

/// `int count(int n) { int i; i = 0; while (i < n) i = i + 1; return i; }`
fn sample_count() -> Program {
    let i = || Expr::ident("i", Type::Int);
    Program {
        functions: vec![Function {
            name: "count".to_string(),
            ret: Type::Int,
            params: vec![Param {
                name: "n".to_string(),
                ty: Type::Int,
            }],
            body: vec![
                Stmt::Local {
                    name: "i".to_string(),
                    ty: Type::Int,
                    init: Some(Expr::int(0)),
                },
                Stmt::While {
                    label: None,
                    cond: Expr::binary(BinOp::Lt, i(), Expr::ident("n", Type::Int), Type::Int),
                    body: vec![Stmt::Expr(Expr::Assign {
                        target: Box::new(i()),
                        value: Box::new(Expr::binary(BinOp::Add, i(), Expr::int(1), Type::Int)),
                        ty: Type::Int,
                    })],
                },
                Stmt::Return(Some(i())),
            ],
        }],
    }
}

/// `int greet() { puts("hello"); puts("world"); return 0; }`
fn sample_strings() -> Program {
    let puts = |text: &str| {
        Stmt::Expr(Expr::Call {
            callee: "puts".to_string(),
            args: vec![Expr::StrLit(text.to_string())],
            ty: Type::Int,
        })
    };
    Program {
        functions: vec![Function {
            name: "greet".to_string(),
            ret: Type::Int,
            params: Vec::new(),
            body: vec![puts("hello"), puts("world"), Stmt::Return(Some(Expr::int(0)))],
        }],
    }
}
