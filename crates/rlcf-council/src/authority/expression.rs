//! Restricted arithmetic expressions for credential scoring.
//!
//! Credential rules may score a numeric credential with a formula such as
//! `min(1.0, value / 10)`. Formulas come from configuration, so evaluation is
//! confined to a fixed grammar with no general code execution:
//!
//! | Construct | Allowed |
//! |-----------|---------|
//! | Literals | decimal numbers |
//! | Variables | `value` only |
//! | Operators | `+ - * /`, unary minus, parentheses |
//! | Functions | `sqrt(x)`, `min(a, b, ...)`, `max(a, b, ...)` |
//!
//! Input length and nesting depth are bounded. Evaluation is total from the
//! caller's point of view: [`evaluate_or_zero`] maps every failure, including
//! non-finite results, to `0.0`.

use thiserror::Error;

/// Maximum accepted expression length in bytes.
pub const MAX_EXPRESSION_LEN: usize = 256;

/// Maximum nesting depth of parentheses, calls and unary operators.
pub const MAX_DEPTH: usize = 32;

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// The expression exceeds [`MAX_EXPRESSION_LEN`].
    #[error("expression is {0} bytes long, limit is {MAX_EXPRESSION_LEN}")]
    TooLong(usize),

    /// The expression nests deeper than [`MAX_DEPTH`].
    #[error("expression nests deeper than {MAX_DEPTH}")]
    TooDeep,

    /// A character outside the grammar.
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    /// The expression ended early.
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// A token in the wrong place.
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    /// An identifier that is neither `value` nor a known function.
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    /// A function called with the wrong number of arguments.
    #[error("{function} takes {expected} arguments, got {found}")]
    WrongArity {
        /// Function name.
        function: &'static str,
        /// Accepted argument count.
        expected: &'static str,
        /// Supplied argument count.
        found: usize,
    },

    /// The result is NaN or infinite.
    #[error("expression produced a non-finite result")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Ident(name) => name.clone(),
            Token::Plus => "+".to_string(),
            Token::Minus => "-".to_string(),
            Token::Star => "*".to_string(),
            Token::Slash => "/".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Comma => ",".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Function {
    Sqrt,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Value,
    Neg(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(Function, Vec<Node>),
}

/// A parsed expression over the variable `value`.
///
/// # Example
///
/// ```rust
/// use rlcf_council::authority::expression::Expression;
///
/// let expr = Expression::parse("1 + sqrt(value) / 2").unwrap();
/// assert_eq!(expr.eval(16.0).unwrap(), 3.0);
/// assert!(expr.eval(-1.0).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    /// Parses an expression.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        if source.len() > MAX_EXPRESSION_LEN {
            return Err(ExpressionError::TooLong(source.len()));
        }
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.expr()?;
        match parser.peek() {
            None => Ok(Self { root }),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.describe())),
        }
    }

    /// Evaluates with `value` bound to the given number.
    pub fn eval(&self, value: f64) -> Result<f64, ExpressionError> {
        let result = eval_node(&self.root, value);
        if result.is_finite() {
            Ok(result)
        } else {
            Err(ExpressionError::NonFinite)
        }
    }
}

/// Parses and evaluates in one step.
pub fn evaluate(source: &str, value: f64) -> Result<f64, ExpressionError> {
    Expression::parse(source)?.eval(value)
}

/// Parses and evaluates, mapping any failure to `0.0`.
pub fn evaluate_or_zero(source: &str, value: f64) -> f64 {
    evaluate(source, value).unwrap_or(0.0)
}

fn eval_node(node: &Node, value: f64) -> f64 {
    match node {
        Node::Number(n) => *n,
        Node::Value => value,
        Node::Neg(inner) => -eval_node(inner, value),
        Node::Binary(op, lhs, rhs) => {
            let (a, b) = (eval_node(lhs, value), eval_node(rhs, value));
            match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
            }
        }
        Node::Call(function, args) => {
            let mut values = args.iter().map(|arg| eval_node(arg, value));
            match function {
                Function::Sqrt => values.next().map_or(f64::NAN, f64::sqrt),
                // NaN operands must poison the result instead of being skipped.
                Function::Min => values.fold(f64::INFINITY, |acc, v| {
                    if v.is_nan() || acc.is_nan() {
                        f64::NAN
                    } else {
                        acc.min(v)
                    }
                }),
                Function::Max => values.fold(f64::NEG_INFINITY, |acc, v| {
                    if v.is_nan() || acc.is_nan() {
                        f64::NAN
                    } else {
                        acc.max(v)
                    }
                }),
            }
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::UnexpectedToken(literal.clone()))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => return Err(ExpressionError::UnexpectedChar(other, offset)),
                };
                tokens.push(token);
                chars.next();
            }
        }
    }
    Ok(tokens)
}

/// Recursive-descent parser.
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/') unary)*
/// unary   := ('-' | '+') unary | primary
/// primary := NUMBER | 'value' | FUNC '(' expr (',' expr)* ')' | '(' expr ')'
/// ```
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.describe())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn descend(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(node),
            };
            self.pos += 1;
            node = Node::Binary(op, Box::new(node), Box::new(self.term()?));
        }
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(node),
            };
            self.pos += 1;
            node = Node::Binary(op, Box::new(node), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.descend()?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(Node::Neg(Box::new(inner)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.descend()?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(inner)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Node::Number(n)),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "value" => Ok(Node::Value),
                "sqrt" => self.call(Function::Sqrt, "sqrt", "1", |n| n == 1),
                "min" => self.call(Function::Min, "min", "2 or more", |n| n >= 2),
                "max" => self.call(Function::Max, "max", "2 or more", |n| n >= 2),
                _ => Err(ExpressionError::UnknownIdentifier(name)),
            },
            Some(token) => Err(ExpressionError::UnexpectedToken(token.describe())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn call(
        &mut self,
        function: Function,
        name: &'static str,
        expected: &'static str,
        arity_ok: fn(usize) -> bool,
    ) -> Result<Node, ExpressionError> {
        self.expect(Token::LParen)?;
        self.descend()?;
        let mut args = vec![self.expr()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            args.push(self.expr()?);
        }
        self.expect(Token::RParen)?;
        self.depth -= 1;

        if !arity_ok(args.len()) {
            return Err(ExpressionError::WrongArity {
                function: name,
                expected,
                found: args.len(),
            });
        }
        Ok(Node::Call(function, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert!(approx(evaluate("1 + 2 * 3", 0.0).unwrap(), 7.0));
        assert!(approx(evaluate("(1 + 2) * 3", 0.0).unwrap(), 9.0));
        assert!(approx(evaluate("10 / 4 - 1", 0.0).unwrap(), 1.5));
        assert!(approx(evaluate("2 - 3 - 4", 0.0).unwrap(), -5.0));
    }

    #[test]
    fn test_value_and_functions() {
        assert!(approx(evaluate("min(1.0, value / 10)", 25.0).unwrap(), 1.0));
        assert!(approx(evaluate("min(1.0, value / 10)", 4.0).unwrap(), 0.4));
        assert!(approx(evaluate("max(value, 2, 3)", 1.0).unwrap(), 3.0));
        assert!(approx(evaluate("sqrt(value) * 2", 9.0).unwrap(), 6.0));
    }

    #[test]
    fn test_unary_minus() {
        assert!(approx(evaluate("-value + 1", 3.0).unwrap(), -2.0));
        assert!(approx(evaluate("--2", 0.0).unwrap(), 2.0));
        assert!(approx(evaluate("2 * -(1 + 1)", 0.0).unwrap(), -4.0));
    }

    #[test]
    fn test_rejects_unknown_identifiers() {
        assert_eq!(
            evaluate("exp(value)", 1.0),
            Err(ExpressionError::UnknownIdentifier("exp".to_string()))
        );
        assert_eq!(
            evaluate("__import__", 1.0),
            Err(ExpressionError::UnknownIdentifier("__import__".to_string()))
        );
    }

    #[test]
    fn test_rejects_foreign_characters() {
        assert!(matches!(
            evaluate("value ** 2", 1.0),
            Err(ExpressionError::UnexpectedToken(_))
        ));
        assert!(matches!(
            evaluate("value; 1", 1.0),
            Err(ExpressionError::UnexpectedChar(';', 5))
        ));
        assert!(matches!(
            evaluate("value[0]", 1.0),
            Err(ExpressionError::UnexpectedChar('[', 5))
        ));
    }

    #[test]
    fn test_malformed_syntax() {
        assert_eq!(evaluate("1 +", 0.0), Err(ExpressionError::UnexpectedEnd));
        assert_eq!(evaluate("(1 + 2", 0.0), Err(ExpressionError::UnexpectedEnd));
        assert!(matches!(
            evaluate("1 2", 0.0),
            Err(ExpressionError::UnexpectedToken(_))
        ));
        assert!(matches!(
            evaluate("1..2", 0.0),
            Err(ExpressionError::UnexpectedToken(_))
        ));
        assert_eq!(evaluate("", 0.0), Err(ExpressionError::UnexpectedEnd));
    }

    #[test]
    fn test_arity() {
        assert!(matches!(
            evaluate("sqrt(1, 2)", 0.0),
            Err(ExpressionError::WrongArity { function: "sqrt", .. })
        ));
        assert!(matches!(
            evaluate("min(1)", 0.0),
            Err(ExpressionError::WrongArity { function: "min", .. })
        ));
    }

    #[test]
    fn test_non_finite_results() {
        assert_eq!(evaluate("1 / value", 0.0), Err(ExpressionError::NonFinite));
        assert_eq!(evaluate("sqrt(value)", -1.0), Err(ExpressionError::NonFinite));
        assert_eq!(evaluate("min(sqrt(value), 1)", -1.0), Err(ExpressionError::NonFinite));
        assert_eq!(evaluate("value", f64::NAN), Err(ExpressionError::NonFinite));
    }

    #[test]
    fn test_limits() {
        let long = "1+".repeat(200) + "1";
        assert!(matches!(evaluate(&long, 0.0), Err(ExpressionError::TooLong(_))));

        let deep = "(".repeat(40) + "1" + &")".repeat(40);
        assert_eq!(evaluate(&deep, 0.0), Err(ExpressionError::TooDeep));

        let shallow = "(".repeat(10) + "1" + &")".repeat(10);
        assert!(approx(evaluate(&shallow, 0.0).unwrap(), 1.0));
    }

    #[test]
    fn test_evaluate_or_zero() {
        assert_eq!(evaluate_or_zero("nonsense(", 5.0), 0.0);
        assert_eq!(evaluate_or_zero("1 / 0", 5.0), 0.0);
        assert!(approx(evaluate_or_zero("value / 2", 5.0), 2.5));
    }
}
