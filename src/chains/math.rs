//! Question → expression → answer chain.
//!
//! The model only translates the question into an arithmetic expression.
//! Evaluation happens here, in a closed expression language with no access
//! to the host.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::error::{QabotError, Result};
use crate::llm::LanguageModel;
use crate::message::Message;

static TEXT_BLOCK: OnceLock<Regex> = OnceLock::new();

const MATH_PROMPT: &str = r#"Translate a math problem into a expression that can be evaluated. Use the output of evaluating this expression to answer the question.
Supported operators are + - * / % ^ and parentheses. Supported functions are sqrt, abs, ln, log, log10, exp, sin, cos, tan, floor, ceil, round, min, max and pow. The constants pi and e are available.

Question: ${Question with math problem.}
```text
${single line mathematical expression that solves the problem}
```
...evaluate...
```output
${Output of evaluating the expression}
```
Answer: ${Answer}

Begin.

Question: What is 37593 * 67?
```text
37593 * 67
```
...evaluate...
```output
2518731
```
Answer: 2518731

Question: 37593^(1/5)
```text
37593^(1/5)
```
...evaluate...
```output
8.222831614237718
```
Answer: 8.222831614237718

Question: {question}
"#;

#[derive(Clone)]
pub struct MathChain {
    model: Arc<dyn LanguageModel>,
}

impl MathChain {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn run(&self, question: &str) -> Result<String> {
        let prompt = MATH_PROMPT.replace("{question}", question.trim());
        let completion = self
            .model
            .complete_chat(&[Message::user(prompt)], &["```output".to_string()])
            .await?;
        let reply = completion.into_text();
        debug!(reply = %reply, "math chain reply");
        process_reply(&reply)
    }
}

fn process_reply(reply: &str) -> Result<String> {
    let reply = reply.trim();
    let block = TEXT_BLOCK
        .get_or_init(|| Regex::new(r"(?s)```text(.*?)```").expect("valid text block pattern"));
    if let Some(caps) = block.captures(reply) {
        let expression = caps[1].trim();
        let value = evaluate(expression)?;
        return Ok(format!("Answer: {}", format_number(value)));
    }
    if reply.starts_with("Answer:") {
        return Ok(reply.to_string());
    }
    if let Some((_, answer)) = reply.rsplit_once("Answer:") {
        return Ok(format!("Answer: {}", answer.trim()));
    }
    Err(QabotError::Chain(format!("unknown format from LLM: {reply}")))
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Evaluates a single arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(QabotError::Chain(format!(
            "unexpected trailing input in `{expression}`"
        )));
    }
    if !value.is_finite() {
        return Err(QabotError::Chain(format!(
            "`{expression}` does not evaluate to a finite number"
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
                // scientific notation
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().filter(|c| **c != '_').collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| QabotError::Chain(format!("invalid number `{literal}`")))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Caret);
                i += 2;
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' | '×' => Token::Star,
                    '/' | '÷' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Caret,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => {
                        return Err(QabotError::Chain(format!(
                            "unexpected character `{other}` in expression"
                        )))
                    }
                };
                tokens.push(token);
                i += 1;
            }
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

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(QabotError::Chain(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(QabotError::Chain("division by zero".into()));
                    }
                    value /= rhs;
                }
                Some(Token::Percent) => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(QabotError::Chain("modulo by zero".into()));
                    }
                    value %= rhs;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64> {
        let base = self.primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        args.push(self.expr()?);
                        while let Some(Token::Comma) = self.peek() {
                            self.pos += 1;
                            args.push(self.expr()?);
                        }
                    }
                    self.expect(Token::RParen)?;
                    call_function(&name, &args)
                } else {
                    constant(&name)
                }
            }
            other => Err(QabotError::Chain(format!("unexpected token {other:?}"))),
        }
    }
}

fn constant(name: &str) -> Result<f64> {
    match name {
        "pi" | "PI" => Ok(std::f64::consts::PI),
        "e" | "E" => Ok(std::f64::consts::E),
        "tau" => Ok(std::f64::consts::TAU),
        other => Err(QabotError::Chain(format!("unknown identifier `{other}`"))),
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<f64> {
    let unary = |f: fn(f64) -> f64| -> Result<f64> {
        match args {
            [x] => Ok(f(*x)),
            _ => Err(QabotError::Chain(format!(
                "`{name}` takes 1 argument, got {}",
                args.len()
            ))),
        }
    };
    match name {
        "sqrt" => unary(f64::sqrt),
        "abs" => unary(f64::abs),
        "ln" | "log" => unary(f64::ln),
        "log10" => unary(f64::log10),
        "log2" => unary(f64::log2),
        "exp" => unary(f64::exp),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "round" => unary(f64::round),
        "pow" => match args {
            [base, exponent] => Ok(base.powf(*exponent)),
            _ => Err(QabotError::Chain("`pow` takes 2 arguments".into())),
        },
        "min" | "max" if !args.is_empty() => {
            let fold: fn(f64, f64) -> f64 = if name == "min" { f64::min } else { f64::max };
            Ok(args[1..].iter().copied().fold(args[0], fold))
        }
        other => Err(QabotError::Chain(format!("unknown function `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;

    #[test]
    fn evaluates_precedence_and_powers() {
        assert_eq!(evaluate("2+2").unwrap(), 4.0);
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(evaluate("2 ** 10").unwrap(), 1024.0);
        assert_eq!(evaluate("-3 + 10 % 4").unwrap(), -1.0);
        assert_eq!(evaluate("1e3 / 4").unwrap(), 250.0);
    }

    #[test]
    fn evaluates_functions_and_constants() {
        assert_eq!(evaluate("sqrt(16) + abs(-2)").unwrap(), 6.0);
        assert_eq!(evaluate("max(1, 7, 3)").unwrap(), 7.0);
        assert_eq!(evaluate("round(pi * 100)").unwrap(), 314.0);
    }

    #[test]
    fn rejects_invalid_expressions() {
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("import os").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("foo(1)").is_err());
    }

    #[test]
    fn formats_integral_results_without_fraction() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[tokio::test]
    async fn answers_from_expression_block() {
        let model = StubModel::new(["```text\n2 + 2\n```\n...evaluate..."]);
        let chain = MathChain::new(model.clone());

        assert_eq!(chain.run("what is 2+2?").await.unwrap(), "Answer: 4");
        let prompt = &model.requests()[0][0].content;
        assert!(prompt.ends_with("Question: what is 2+2?\n"));
    }

    #[tokio::test]
    async fn passes_through_direct_answers() {
        let chain = MathChain::new(StubModel::new(["Answer: 42"]));
        assert_eq!(chain.run("meaning of life").await.unwrap(), "Answer: 42");
    }

    #[tokio::test]
    async fn unknown_reply_shape_is_an_error() {
        let chain = MathChain::new(StubModel::new(["I cannot do maths"]));
        assert!(matches!(
            chain.run("what?").await,
            Err(QabotError::Chain(_))
        ));
    }
}
