/// Expression evaluator — the sandboxed mini-language behind `{…}` blocks,
/// inline conditionals, and Condition nodes. Variables are denoted `$name`
/// (global) and `%name` (local); assignment writes back to the store.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::schema::project::{VarType, Variable};
use crate::schema::value::Value;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("division by zero")]
    DivisionByZero,
}

/// Which of the two flat stores a variable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Local,
}

/// The two flat name→value maps. Globals are seeded from the project's
/// variable declarations on load; locals start empty.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    globals: FxHashMap<String, Value>,
    locals: FxHashMap<String, Value>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reseed the global map from project declarations. `separator`
    /// variables are editor-only dividers and never reach the store.
    pub fn seed_globals(&mut self, variables: &[Variable]) {
        self.globals.clear();
        for var in variables {
            if var.var_type == VarType::Separator {
                continue;
            }
            self.globals.insert(var.key.clone(), var.value.clone());
        }
    }

    pub fn clear_locals(&mut self) {
        self.locals.clear();
    }

    pub fn get(&self, scope: Scope, name: &str) -> Option<&Value> {
        match scope {
            Scope::Global => self.globals.get(name),
            Scope::Local => self.locals.get(name),
        }
    }

    pub fn set(&mut self, scope: Scope, name: &str, value: Value) {
        let map = match scope {
            Scope::Global => &mut self.globals,
            Scope::Local => &mut self.locals,
        };
        map.insert(name.to_string(), value);
    }

    pub fn globals(&self) -> &FxHashMap<String, Value> {
        &self.globals
    }

    pub fn locals(&self) -> &FxHashMap<String, Value> {
        &self.locals
    }
}

/// Strip the HTML debris rich-text editors leave inside expressions.
pub fn sanitize(source: &str) -> String {
    source
        .replace("<br/>", " ")
        .replace("<br />", " ")
        .replace("<br>", " ")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&nbsp;", " ")
}

/// Evaluate an authored expression against the store. Sanitizes, parses,
/// and runs; assignments write through to the store.
pub fn evaluate(source: &str, store: &mut VarStore) -> Result<Value, EvalError> {
    let sanitized = sanitize(source);
    let tokens = lex(&sanitized)?;
    if tokens.is_empty() {
        return Err(EvalError::Syntax("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(EvalError::Syntax(format!(
            "trailing input after expression: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    eval_expr(&expr, store)
}

/// When the whole source is exactly one variable reference, return it.
/// The templater substitutes such blocks with the value; anything more
/// complex runs for effect only.
pub fn single_variable(source: &str) -> Option<(Scope, String)> {
    let sanitized = sanitize(source);
    let tokens = lex(&sanitized).ok()?;
    match tokens.as_slice() {
        [Token::Var(scope, name)] => Some((*scope, name.clone())),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Value),
    Str(String),
    Bool(bool),
    Var(Scope, String),
    Op(&'static str),
    LParen,
    RParen,
}

fn lex(source: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '$' | '%' => {
                // `%` doubles as the modulo operator; it is a sigil only
                // when an identifier head follows directly.
                let is_sigil = chars
                    .get(i + 1)
                    .map(|n| n.is_ascii_alphabetic())
                    .unwrap_or(false);
                if c == '%' && !is_sigil {
                    tokens.push(Token::Op("%"));
                    i += 1;
                    continue;
                }
                if !is_sigil {
                    return Err(EvalError::Syntax(format!(
                        "expected variable name after '{}'",
                        c
                    )));
                }
                let scope = if c == '$' { Scope::Global } else { Scope::Local };
                let start = i + 1;
                let mut end = start + 1;
                while end < chars.len()
                    && (chars[end].is_ascii_alphanumeric() || chars[end] == '_' || chars[end] == '.')
                {
                    end += 1;
                }
                tokens.push(Token::Var(scope, chars[start..end].iter().collect()));
                i = end;
            }
            '0'..='9' => {
                let start = i;
                let mut saw_dot = false;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || (chars[i] == '.' && !saw_dot))
                {
                    if chars[i] == '.' {
                        saw_dot = true;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = if saw_dot {
                    Value::Float(text.parse().map_err(|_| {
                        EvalError::Syntax(format!("bad number literal: {}", text))
                    })?)
                } else {
                    Value::Int(text.parse().map_err(|_| {
                        EvalError::Syntax(format!("bad number literal: {}", text))
                    })?)
                };
                tokens.push(Token::Num(value));
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end == chars.len() {
                    return Err(EvalError::Syntax("unterminated string literal".to_string()));
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            _ if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    other => {
                        return Err(EvalError::Syntax(format!(
                            "unknown identifier '{}' (variables need a $ or % sigil)",
                            other
                        )))
                    }
                }
            }
            _ => {
                let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let op2 = match two.as_str() {
                    "==" | "!=" | "<=" | ">=" | "&&" | "||" | "+=" | "-=" | "*=" | "/=" | "%=" => {
                        Some(two)
                    }
                    _ => None,
                };
                if let Some(op) = op2 {
                    tokens.push(Token::Op(intern_op(&op)?));
                    i += 2;
                } else {
                    let op1 = match c {
                        '+' | '-' | '*' | '/' | '<' | '>' | '=' | '!' => c.to_string(),
                        _ => {
                            return Err(EvalError::Syntax(format!(
                                "unexpected character '{}'",
                                c
                            )))
                        }
                    };
                    tokens.push(Token::Op(intern_op(&op1)?));
                    i += 1;
                }
            }
        }
    }
    Ok(tokens)
}

fn intern_op(op: &str) -> Result<&'static str, EvalError> {
    const OPS: &[&str] = &[
        "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "*=", "/=", "%=", "+", "-", "*", "/",
        "%", "<", ">", "=", "!",
    ];
    OPS.iter()
        .find(|&&known| known == op)
        .copied()
        .ok_or_else(|| EvalError::Syntax(format!("unknown operator '{}'", op)))
}

// ---------------------------------------------------------------------------
// Parser — small precedence-climbing recursive descent over the token list.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Var(Scope, String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    /// `$x = rhs` or a compound form carrying the underlying operator.
    Assign(Scope, String, Option<&'static str>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        if let Some(Token::Op(op)) = self.peek() {
            if ops.contains(op) {
                let op = *op;
                self.pos += 1;
                return Some(op);
            }
        }
        None
    }

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        // Assignment: variable head followed by an assignment operator.
        if let (Some(Token::Var(scope, name)), Some(Token::Op(op))) =
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
        {
            let compound = match *op {
                "=" => Some(None),
                "+=" => Some(Some("+")),
                "-=" => Some(Some("-")),
                "*=" => Some(Some("*")),
                "/=" => Some(Some("/")),
                "%=" => Some(Some("%")),
                _ => None,
            };
            if let Some(underlying) = compound {
                let scope = *scope;
                let name = name.clone();
                self.pos += 2;
                let rhs = self.parse_expr()?;
                return Ok(Expr::Assign(scope, name, underlying, Box::new(rhs)));
            }
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary("||", Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_equality()?;
        while self.eat_op(&["&&"]).is_some() {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary("&&", Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_comparison()?;
        while let Some(op) = self.eat_op(&["==", "!="]) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_additive()?;
        while let Some(op) = self.eat_op(&["<", "<=", ">", ">="]) {
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_term()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/", "%"]) {
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat_op(&["!"]).is_some() {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat_op(&["-"]).is_some() {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.bump() {
            Some(Token::Num(value)) => Ok(Expr::Literal(value)),
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::Str(text))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(Value::Bool(b))),
            Some(Token::Var(scope, name)) => Ok(Expr::Var(scope, name)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(EvalError::Syntax("expected ')'".to_string())),
                }
            }
            other => Err(EvalError::Syntax(format!(
                "expected a value, found {:?}",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval_expr(expr: &Expr, store: &mut VarStore) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(scope, name) => store
            .get(*scope, name)
            .cloned()
            .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
        Expr::Not(inner) => Ok(Value::Bool(!eval_expr(inner, store)?.is_truthy())),
        Expr::Neg(inner) => match eval_expr(inner, store)? {
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(EvalError::Type(format!(
                "cannot negate a {}",
                other.type_name()
            ))),
        },
        Expr::Binary(op, lhs, rhs) => match *op {
            "&&" => {
                if !eval_expr(lhs, store)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(eval_expr(rhs, store)?.is_truthy()))
            }
            "||" => {
                if eval_expr(lhs, store)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(eval_expr(rhs, store)?.is_truthy()))
            }
            _ => {
                let left = eval_expr(lhs, store)?;
                let right = eval_expr(rhs, store)?;
                apply_binary(op, &left, &right)
            }
        },
        Expr::Assign(scope, name, compound, rhs) => {
            let rhs_value = eval_expr(rhs, store)?;
            let new_value = match compound {
                None => rhs_value,
                Some(op) => {
                    let current = store
                        .get(*scope, name)
                        .cloned()
                        .ok_or_else(|| EvalError::UndefinedVariable(name.clone()))?;
                    apply_binary(op, &current, &rhs_value)?
                }
            };
            store.set(*scope, name, new_value.clone());
            Ok(new_value)
        }
    }
}

fn apply_binary(op: &str, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        "==" => Ok(Value::Bool(left.loose_eq(right))),
        "!=" => Ok(Value::Bool(!left.loose_eq(right))),
        "<" | "<=" | ">" | ">=" => compare(op, left, right),
        "+" => add(left, right),
        "-" | "*" | "/" | "%" => arithmetic(op, left, right),
        _ => Err(EvalError::Syntax(format!("unknown operator '{}'", op))),
    }
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        let result = match op {
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            _ => a >= b,
        };
        return Ok(Value::Bool(result));
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => {
            let result = match op {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                _ => a >= b,
            };
            Ok(Value::Bool(result))
        }
        _ => Err(EvalError::Type(format!(
            "cannot order {} against {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// `+` concatenates when either side is a string, otherwise adds.
fn add(left: &Value, right: &Value) -> Result<Value, EvalError> {
    if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
        return Ok(Value::Str(format!("{}{}", left, right)));
    }
    arithmetic("+", left, right)
}

fn arithmetic(op: &str, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        return match op {
            "+" => Ok(Value::Int(a.wrapping_add(b))),
            "-" => Ok(Value::Int(a.wrapping_sub(b))),
            "*" => Ok(Value::Int(a.wrapping_mul(b))),
            "/" => {
                if b == 0 {
                    Err(EvalError::DivisionByZero)
                } else if a % b == 0 {
                    Ok(Value::Int(a / b))
                } else {
                    Ok(Value::Float(a as f64 / b as f64))
                }
            }
            _ => {
                if b == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(Value::Int(a % b))
                }
            }
        };
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => match op {
            "+" => Ok(Value::Float(a + b)),
            "-" => Ok(Value::Float(a - b)),
            "*" => Ok(Value::Float(a * b)),
            "/" | "%" => {
                if b == 0.0 {
                    Err(EvalError::DivisionByZero)
                } else if op == "/" {
                    Ok(Value::Float(a / b))
                } else {
                    Ok(Value::Float(a % b))
                }
            }
            _ => unreachable!(),
        },
        _ => Err(EvalError::Type(format!(
            "'{}' needs numbers, got {} and {}",
            op,
            left.type_name(),
            right.type_name()
        ))),
    }
}
