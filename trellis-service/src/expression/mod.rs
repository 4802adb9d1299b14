// Condition Language
// Step conditions over job variables, plus $(var) macro substitution

pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use evaluator::{substitute_macros, Condition, EvalError, Evaluator, Value};
pub use lexer::{tokenize, Spanned, Sym, SyntaxError, Tok};
pub use parser::{parse, BinaryOp, Expr};
