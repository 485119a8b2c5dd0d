//! Arithmetic evaluator behind the `calculate` tool

use serde_json::json;

use crate::tools::{Tool, required_str};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' || d == '_' {
                        if d != '_' {
                            text.push(d);
                        }
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = text
                    .parse()
                    .map_err(|_| Error::Tool(format!("invalid number '{text}'")))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name.to_lowercase()));
            }
            '*' => {
                chars.next();
                // `**` is exponentiation
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::Op('^'));
                } else {
                    tokens.push(Token::Op('*'));
                }
            }
            '+' | '-' | '/' | '%' | '^' => {
                chars.next();
                tokens.push(Token::Op(c));
            }
            '×' => {
                chars.next();
                tokens.push(Token::Op('*'));
            }
            '÷' => {
                chars.next();
                tokens.push(Token::Op('/'));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            other => return Err(Error::Tool(format!("invalid character '{other}'"))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
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

    fn expect_rparen(&mut self) -> Result<()> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err(Error::Tool("missing closing parenthesis".to_string())),
        }
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err(Error::Tool("Division by zero".to_string())),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64> {
        let base = self.atom()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            // Right-associative, and binds tighter than a unary minus on its left
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64> {
        match self.next() {
            Some(Token::Num(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect_rparen()?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let arg = self.expr()?;
                    self.expect_rparen()?;
                    apply_function(&name, arg)
                } else {
                    constant(&name)
                }
            }
            Some(token) => Err(Error::Tool(format!("unexpected {token:?}"))),
            None => Err(Error::Tool("unexpected end of expression".to_string())),
        }
    }
}

fn constant(name: &str) -> Result<f64> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        other => Err(Error::Tool(format!("unknown name '{other}'"))),
    }
}

fn apply_function(name: &str, x: f64) -> Result<f64> {
    let value = match name {
        "sqrt" if x < 0.0 => {
            return Err(Error::Tool("square root of a negative number".to_string()));
        }
        "sqrt" => x.sqrt(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "asin" => x.asin(),
        "acos" => x.acos(),
        "atan" => x.atan(),
        "log" | "ln" | "log10" if x <= 0.0 => {
            return Err(Error::Tool("logarithm of a non-positive number".to_string()));
        }
        "log" | "ln" => x.ln(),
        "log10" => x.log10(),
        "exp" => x.exp(),
        "abs" => x.abs(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => x.round(),
        other => return Err(Error::Tool(format!("unknown function '{other}'"))),
    };
    Ok(value)
}

/// Evaluate an arithmetic expression
///
/// # Errors
///
/// Returns error on a syntax error, an unknown name, division by zero, or a
/// non-finite result
pub fn evaluate(expression: &str) -> Result<f64> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(Error::Tool("empty expression".to_string()));
    }

    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;

    if let Some(token) = parser.peek() {
        return Err(Error::Tool(format!("unexpected {token:?}")));
    }
    if !value.is_finite() {
        return Err(Error::Tool("result is not a finite number".to_string()));
    }
    Ok(value)
}

/// Render a result without float noise
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{value:.0}");
    }

    let text = format!("{value:.10}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// The `calculate` tool
#[must_use]
pub fn tool() -> Tool {
    Tool::from_fn(
        "calculate",
        "Perform mathematical calculations. Supports basic arithmetic, trigonometry, and common math functions.",
        |args| {
            let expression = required_str(args, "expression")?;
            let value = evaluate(expression)?;
            Ok(format!("{expression} = {}", format_number(value)))
        },
    )
    .parameters(json!({
        "type": "object",
        "properties": {
            "expression": {
                "type": "string",
                "description": "Mathematical expression to evaluate (e.g., '2 + 2', 'sqrt(16)', 'sin(pi/2)')"
            }
        },
        "required": ["expression"]
    }))
    .usage_rule("calculate: math questions, arithmetic, unit-free numeric computation")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolArgs, ToolOutput};

    fn eval(expr: &str) -> f64 {
        evaluate(expr).unwrap()
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("2 ^ 3 ^ 2"), 512.0);
        assert_eq!(eval("2 ** 10"), 1024.0);
        assert_eq!(eval("-2 ^ 2"), -4.0);
        assert_eq!(eval("10 - 4 - 3"), 3.0);
        assert_eq!(eval("17 % 5"), 2.0);
        assert_eq!(eval("6 × 7 ÷ 2"), 21.0);
    }

    #[test]
    fn functions_and_constants() {
        assert_eq!(eval("sqrt(16)"), 4.0);
        assert!((eval("sin(pi / 2)") - 1.0).abs() < 1e-12);
        assert!((eval("ln(e)") - 1.0).abs() < 1e-12);
        assert_eq!(eval("log10(1000)"), 3.0);
        assert_eq!(eval("abs(-3) + floor(2.7) + ceil(0.2) + round(1.5)"), 8.0);
        assert_eq!(eval("1_000 * 2"), 2000.0);
    }

    #[test]
    fn errors() {
        assert!(matches!(evaluate("1 / 0"), Err(Error::Tool(m)) if m == "Division by zero"));
        assert!(evaluate("5 % 0").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1 2").is_err());
        assert!(evaluate("import os").is_err());
        assert!(evaluate("sqrt(-1)").is_err());
        assert!(evaluate("").is_err());
        assert!(evaluate("2; rm").is_err());
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(-12.0), "-12");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[tokio::test]
    async fn tool_output_shape() {
        let mut args = ToolArgs::new();
        args.insert("expression".to_string(), "2 + 2".into());
        assert_eq!(
            tool().call(&args).await.unwrap(),
            ToolOutput::Text("2 + 2 = 4".to_string())
        );
    }
}
