//! 公式评估器
//!
//! 公式是一个中缀表达式字符串，`${name}` 占位符在求值前由上下文替换：
//! 数值和布尔值按字面量插入，字符串加引号插入。
//!
//! 优先级从低到高：`or` < `and` < `not` < 比较 < 加减 < 乘除取模 < 一元负号。
//! `&&`、`||`、`!` 分别是 `and`、`or`、`not` 的别名。比较运算不可连写。

use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

use crate::error::{Result, RuleError};
use crate::models::lookup_path;

/// 公式占位符，允许点号路径
static FORMULA_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([a-zA-Z_][a-zA-Z0-9_.]*)\s*\}").expect("formula placeholder pattern is a valid regex")
});

/// 公式求值结果
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Number(f64),
    Bool(bool),
    String(String),
}

impl FormulaValue {
    fn truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => !s.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Bool(_) => "boolean",
            Self::String(_) => "string",
        }
    }

    /// 数值或可解析为数值的字符串
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => crate::marshal::ScriptValue::Number(*n).to_json(),
            Self::Bool(b) => Value::Bool(*b),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for FormulaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Bool(bool),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Gt,
    Gte,
    Lt,
    Lte,
    EqEq,
    NotEq,
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(FormulaValue),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// 公式评估器
pub struct FormulaEvaluator;

impl FormulaEvaluator {
    /// 替换占位符后求值
    ///
    /// 占位符先按点号路径从上下文查找，找不到再从公式变量中查找。
    pub fn evaluate(
        formula: &str,
        data: &Map<String, Value>,
        vars: &Map<String, Value>,
    ) -> Result<FormulaValue> {
        let expanded = Self::substitute(formula, data, vars)?;
        Self::evaluate_expression(&expanded)
    }

    /// 对不含占位符的表达式求值
    pub fn evaluate_expression(expression: &str) -> Result<FormulaValue> {
        Self::check_brackets(expression)?;
        let expr = Parser::parse(expression)?;
        eval(&expr)
    }

    /// 仅做语法校验，不求值
    ///
    /// 占位符以数值 0 代入，因此只检查结构是否合法。
    pub fn validate(formula: &str) -> Result<()> {
        let sample = FORMULA_PLACEHOLDER.replace_all(formula, "0");
        Self::check_brackets(&sample)?;
        Parser::parse(&sample).map(|_| ())
    }

    /// 检查括号是否配对
    pub fn check_brackets(expression: &str) -> Result<()> {
        let mut depth: i32 = 0;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for ch in expression.chars() {
            // 字符串字面量内的括号不计入
            if let Some(q) = quote {
                match ch {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    _ if ch == q => quote = None,
                    _ => {}
                }
                continue;
            }
            match ch {
                '\'' | '"' => quote = Some(ch),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(RuleError::Formula("括号不匹配: 多余的 ')'".into()));
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(RuleError::Formula("括号不匹配: 缺少 ')'".into()));
        }
        Ok(())
    }

    /// 替换占位符
    pub fn substitute(
        formula: &str,
        data: &Map<String, Value>,
        vars: &Map<String, Value>,
    ) -> Result<String> {
        let mut unresolved = None;
        let expanded = FORMULA_PLACEHOLDER.replace_all(formula, |caps: &regex::Captures| {
            let name = &caps[1];
            let value = lookup_path(data, name)
                .or_else(|| vars.get(name))
                .or_else(|| lookup_path(vars, name));
            match value.and_then(literal_text) {
                Some(text) => text,
                None => {
                    if unresolved.is_none() {
                        unresolved = Some(name.to_string());
                    }
                    String::new()
                }
            }
        });

        if let Some(name) = unresolved {
            return Err(RuleError::Formula(format!("无法解析占位符: {}", name)));
        }
        Ok(expanded.into_owned())
    }
}

/// 占位符值的字面量形式；null、数组和对象不能出现在公式中
fn literal_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::String(s) => Some(format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))),
        _ => None,
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // 指数部分，如 1e-7、1E21
                if matches!(chars.get(i), Some('e' | 'E')) {
                    let sign = usize::from(matches!(chars.get(i + 1), Some('+' | '-')));
                    if chars.get(i + 1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                        i += 1 + sign;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| RuleError::Formula(format!("无效的数值: {}", text)))?;
                tokens.push(Token::Number(n));
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(RuleError::Formula("字符串字面量未闭合".into())),
                        Some('\\') => {
                            if let Some(next) = chars.get(i + 1) {
                                s.push(*next);
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.to_ascii_lowercase().as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => return Err(RuleError::Formula(format!("未知的标识符: {}", word))),
                };
                tokens.push(token);
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('>', Some('=')) => (Token::Gte, 2),
                    ('<', Some('=')) => (Token::Lte, 2),
                    ('=', Some('=')) => (Token::EqEq, 2),
                    ('!', Some('=')) => (Token::NotEq, 2),
                    ('&', Some('&')) => (Token::And, 2),
                    ('|', Some('|')) => (Token::Or, 2),
                    ('>', _) => (Token::Gt, 1),
                    ('<', _) => (Token::Lt, 1),
                    ('!', _) => (Token::Not, 1),
                    ('+', _) => (Token::Plus, 1),
                    ('-', _) => (Token::Minus, 1),
                    ('*', _) => (Token::Star, 1),
                    ('/', _) => (Token::Slash, 1),
                    ('%', _) => (Token::Percent, 1),
                    ('(', _) => (Token::LParen, 1),
                    (')', _) => (Token::RParen, 1),
                    _ => return Err(RuleError::Formula(format!("无法识别的字符: '{}'", c))),
                };
                tokens.push(token);
                i += width;
            }
        }
    }

    Ok(tokens)
}

/// 表达式树的最大深度，括号、一元运算和连续的二元运算都计入
const MAX_FORMULA_DEPTH: usize = 128;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn parse(input: &str) -> Result<Expr> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(RuleError::Formula("公式为空".into()));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(RuleError::Formula(format!("多余的符号: {:?}", token)));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_FORMULA_DEPTH {
            return Err(RuleError::Formula(format!(
                "公式嵌套过深，最多 {} 层",
                MAX_FORMULA_DEPTH
            )));
        }
        Ok(())
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.descend()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_not()?;
        while self.eat(&Token::And) {
            self.descend()?;
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Gte) => BinaryOp::Gte,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Lte) => BinaryOp::Lte,
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::Neq,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                }
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                }
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        if self.eat(&Token::Plus) {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(inner);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(FormulaValue::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(FormulaValue::String(s))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(FormulaValue::Bool(b))),
            Some(Token::LParen) => {
                self.descend()?;
                let expr = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err(RuleError::Formula("缺少 ')'".into()));
                }
                self.depth -= 1;
                Ok(expr)
            }
            Some(token) => Err(RuleError::Formula(format!("意外的符号: {:?}", token))),
            None => Err(RuleError::Formula("表达式不完整".into())),
        }
    }
}

fn eval(expr: &Expr) -> Result<FormulaValue> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Neg(inner) => match eval(inner)? {
            FormulaValue::Number(n) => Ok(FormulaValue::Number(-n)),
            other => Err(type_error("-", &other, None)),
        },
        Expr::Not(inner) => Ok(FormulaValue::Bool(!eval(inner)?.truthy())),
        Expr::And(lhs, rhs) => {
            if !eval(lhs)?.truthy() {
                return Ok(FormulaValue::Bool(false));
            }
            Ok(FormulaValue::Bool(eval(rhs)?.truthy()))
        }
        Expr::Or(lhs, rhs) => {
            if eval(lhs)?.truthy() {
                return Ok(FormulaValue::Bool(true));
            }
            Ok(FormulaValue::Bool(eval(rhs)?.truthy()))
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs)?, eval(rhs)?),
    }
}

fn binary(op: BinaryOp, lhs: FormulaValue, rhs: FormulaValue) -> Result<FormulaValue> {
    use FormulaValue::{Bool, Number, String as Str};

    match op {
        BinaryOp::Add => match (&lhs, &rhs) {
            (Number(a), Number(b)) => Ok(Number(a + b)),
            (Str(a), Str(b)) => Ok(Str(format!("{}{}", a, b))),
            _ => Err(type_error("+", &lhs, Some(&rhs))),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (Number(a), Number(b)) = (&lhs, &rhs) else {
                return Err(type_error(op_symbol(op), &lhs, Some(&rhs)));
            };
            match op {
                BinaryOp::Sub => Ok(Number(a - b)),
                BinaryOp::Mul => Ok(Number(a * b)),
                _ if *b == 0.0 => Err(RuleError::Formula("除数不能为零".into())),
                BinaryOp::Div => Ok(Number(a / b)),
                _ => Ok(Number(a % b)),
            }
        }
        BinaryOp::Eq | BinaryOp::Neq => {
            let equal = match (&lhs, &rhs) {
                (Bool(a), Bool(b)) => a == b,
                (Str(a), Str(b)) => a == b,
                _ => match (lhs.as_number(), rhs.as_number()) {
                    (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                    _ => false,
                },
            };
            Ok(Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Gt | BinaryOp::Gte | BinaryOp::Lt | BinaryOp::Lte => {
            let ordering = match (&lhs, &rhs) {
                (Str(a), Str(b)) if a.parse::<f64>().is_err() || b.parse::<f64>().is_err() => {
                    a.partial_cmp(b)
                }
                _ => match (lhs.as_number(), rhs.as_number()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(type_error(op_symbol(op), &lhs, Some(&rhs))),
                },
            };
            let Some(ordering) = ordering else {
                return Ok(Bool(false));
            };
            let result = match op {
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Gte => ordering.is_ge(),
                BinaryOp::Lt => ordering.is_lt(),
                _ => ordering.is_le(),
            };
            Ok(Bool(result))
        }
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Gt => ">",
        BinaryOp::Gte => ">=",
        BinaryOp::Lt => "<",
        BinaryOp::Lte => "<=",
        BinaryOp::Eq => "==",
        BinaryOp::Neq => "!=",
    }
}

fn type_error(op: &str, lhs: &FormulaValue, rhs: Option<&FormulaValue>) -> RuleError {
    match rhs {
        Some(rhs) => RuleError::Formula(format!(
            "运算符 {} 不支持 {} 与 {}",
            op,
            lhs.type_name(),
            rhs.type_name()
        )),
        None => RuleError::Formula(format!("运算符 {} 不支持 {}", op, lhs.type_name())),
    }
}
