//! Recursive-descent expression evaluator
//!
//! Grammar (evaluated while parsing, no intermediate tree):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := '-' unary | '+' unary | power
//! power   := postfix ('^' unary)?
//! postfix := primary ('.' IDENT '(' args ')')*
//! primary := NUMBER | IDENT | IDENT '(' args ')' | '(' expr ')' | '[' items ']'
//! ```
//!
//! Identifiers resolve to environment bindings, calls to scalar helpers or
//! registry generators, and postfix calls to registry operators. Arithmetic
//! broadcasts over sequences.

use crate::algebra::binary::combine;
use crate::algebra::elementwise::{ftom, mtof};
use crate::algebra::{get_registry, Args, Transform};
use crate::parser::context::EvalContext;
use crate::parser::error::{FacetError, Result};
use crate::parser::evaluator::apply_operation_to_value;
use crate::parser::lexer::{Lexer, SpannedToken, Token};
use crate::parser::statement::parse_operation;
use crate::types::Value;

/// Evaluate an argument or datum expression
pub fn evaluate(text: &str, ctx: &mut EvalContext) -> Result<Value> {
    let tokens = Lexer::new(text)
        .tokenize()
        .map_err(|e| FacetError::argument(text.trim(), e))?;
    let mut evaluator = ExpressionEvaluator {
        source: text,
        tokens,
        position: 0,
        ctx,
    };
    let value = evaluator.expression()?;
    if *evaluator.current() != Token::Eof {
        return Err(evaluator.error(format!("unexpected {}", evaluator.current())));
    }
    Ok(value)
}

struct ExpressionEvaluator<'a, 'c> {
    source: &'a str,
    tokens: Vec<SpannedToken>,
    position: usize,
    ctx: &'c mut EvalContext,
}

impl<'a, 'c> ExpressionEvaluator<'a, 'c> {
    fn current(&self) -> &Token {
        self.token_at(self.position)
    }

    fn token_at(&self, index: usize) -> &Token {
        self.tokens
            .get(index)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> FacetError {
        FacetError::argument(self.source.trim(), message)
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if *self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", expected, self.current())))
        }
    }

    fn expression(&mut self) -> Result<Value> {
        let mut left = self.term()?;
        loop {
            match self.current() {
                Token::Plus => {
                    self.advance();
                    let right = self.term()?;
                    left = combine(left, right, |a, b| a + b);
                }
                Token::Minus => {
                    self.advance();
                    let right = self.term()?;
                    left = combine(left, right, |a, b| a - b);
                }
                _ => return Ok(left),
            }
        }
    }

    fn term(&mut self) -> Result<Value> {
        let mut left = self.unary()?;
        loop {
            match self.current() {
                Token::Star => {
                    self.advance();
                    let right = self.unary()?;
                    left = combine(left, right, |a, b| a * b);
                }
                Token::Slash => {
                    self.advance();
                    let right = self.unary()?;
                    left = combine(left, right, |a, b| a / b);
                }
                Token::Percent => {
                    self.advance();
                    let right = self.unary()?;
                    left = combine(left, right, |a, b| a % b);
                }
                _ => return Ok(left),
            }
        }
    }

    fn unary(&mut self) -> Result<Value> {
        self.ctx.enter_nesting(self.source)?;
        let value = self.signed();
        self.ctx.leave_nesting();
        value
    }

    fn signed(&mut self) -> Result<Value> {
        match self.current() {
            Token::Minus => {
                self.advance();
                Ok(self.unary()?.map_leaves(&mut |n| -n))
            }
            Token::Plus => {
                self.advance();
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Value> {
        let base = self.postfix()?;
        if *self.current() == Token::Caret {
            self.advance();
            let exponent = self.unary()?;
            return Ok(combine(base, exponent, f64::powf));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Value> {
        let mut value = self.primary()?;
        while *self.current() == Token::Dot
            && matches!(self.token_at(self.position + 1), Token::Identifier(_))
            && *self.token_at(self.position + 2) == Token::LeftParen
        {
            self.advance();
            let Token::Identifier(name) = self.current().clone() else {
                return Err(self.error("expected operator name"));
            };
            self.advance();
            let raw = self.call_args()?;
            let operation = parse_operation(&name, raw, self.ctx)?;
            value = apply_operation_to_value(value, &operation, self.ctx)?;
        }
        Ok(value)
    }

    fn primary(&mut self) -> Result<Value> {
        match self.current().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Value::Number(n))
            }
            Token::Identifier(name) => {
                self.advance();
                if *self.current() == Token::LeftParen {
                    let raw = self.call_args()?;
                    self.call(&name, raw)
                } else {
                    self.ctx
                        .env
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| self.error(format!("unknown variable '{}'", name)))
                }
            }
            Token::LeftParen => {
                self.advance();
                let value = self.expression()?;
                self.expect(Token::RightParen)?;
                Ok(value)
            }
            Token::LeftBracket => self.list(),
            other => Err(self.error(format!("unexpected {}", other))),
        }
    }

    fn list(&mut self) -> Result<Value> {
        self.expect(Token::LeftBracket)?;
        let mut items = Vec::new();
        loop {
            match self.current() {
                Token::RightBracket => {
                    self.advance();
                    return Ok(Value::Sequence(items));
                }
                Token::Comma => self.advance(),
                Token::Eof => return Err(self.error("unterminated list")),
                _ => items.push(self.expression()?),
            }
        }
    }

    /// Raw source between a call's parentheses; leaves the cursor after `)`
    fn call_args(&mut self) -> Result<&'a str> {
        let open = self.position;
        let mut depth = 0i32;
        let mut index = open;
        loop {
            match self.token_at(index) {
                Token::LeftParen | Token::LeftBracket => depth += 1,
                Token::RightParen | Token::RightBracket => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Token::Eof => return Err(self.error("unbalanced parentheses")),
                _ => {}
            }
            index += 1;
        }
        let start = self.tokens[open].span.end();
        let end = self.tokens[index].span.offset;
        self.position = index + 1;
        Ok(&self.source[start..end])
    }

    fn call(&mut self, name: &str, raw: &str) -> Result<Value> {
        let args = Args::new(raw);
        if let Some(result) = scalar_function(name, &args, self.ctx) {
            return result;
        }
        match get_registry().get(name).map(|op| &op.transform) {
            Some(Transform::Generator(generate)) => generate(&args, self.ctx),
            _ => Err(self.error(format!("unknown function '{}'", name))),
        }
    }
}

fn map_first(args: &Args, ctx: &mut EvalContext, f: fn(f64) -> f64) -> Result<Value> {
    let value = args.value(0, ctx)?.unwrap_or(Value::Number(0.0));
    Ok(value.map_leaves(&mut |n| f(n)))
}

/// Scalar helpers callable inside expressions. `None` when `name` is not one.
fn scalar_function(name: &str, args: &Args, ctx: &mut EvalContext) -> Option<Result<Value>> {
    let result = match name {
        "random" => random(args, ctx),
        "ri" => (|| {
            let min = args.number(0, 0.0, ctx)?;
            let max = args.number(1, 1.0, ctx)?;
            Ok(Value::Number(ctx.random_range(min, max).round()))
        })(),
        "rf" => (|| {
            let min = args.number(0, 0.0, ctx)?;
            let max = args.number(1, 1.0, ctx)?;
            Ok(Value::Number(ctx.random_range(min, max)))
        })(),
        "choose" => choose(args, ctx),
        "mtof" => map_first(args, ctx, mtof),
        "ftom" => map_first(args, ctx, ftom),
        "mtos" => (|| {
            let sample_rate = ctx.vars.sample_rate;
            let value = args.value(0, ctx)?.unwrap_or(Value::Number(69.0));
            Ok(value.map_leaves(&mut |n| sample_rate / mtof(n)))
        })(),
        "ms" => (|| {
            let samples_per_ms = ctx.vars.sample_rate * 0.001;
            let value = args.value(0, ctx)?.unwrap_or(Value::Number(0.0));
            Ok(value.map_leaves(&mut |n| (n.abs() * samples_per_ms).round()))
        })(),
        "abs" => map_first(args, ctx, f64::abs),
        "round" => map_first(args, ctx, f64::round),
        "floor" => map_first(args, ctx, f64::floor),
        "ceil" => map_first(args, ctx, f64::ceil),
        "sin" => map_first(args, ctx, f64::sin),
        "cos" => map_first(args, ctx, f64::cos),
        "sqrt" => map_first(args, ctx, f64::sqrt),
        "pow" => (|| {
            let base = args.value(0, ctx)?.unwrap_or(Value::Number(0.0));
            let exponent = args.value(1, ctx)?.unwrap_or(Value::Number(1.0));
            Ok(combine(base, exponent, f64::powf))
        })(),
        "min" | "max" => extremum(name == "max", args, ctx),
        _ => return None,
    };
    Some(result)
}

fn random(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let min = args.number(0, 0.0, ctx)?;
    let max = args.number(1, 1.0, ctx)?;
    let int_mode = args.number(2, 0.0, ctx)?;
    if int_mode != 0.0 && int_mode != 1.0 {
        return Err(FacetError::argument(
            args.raw(),
            "int_mode must be 1 or 0 if specified",
        ));
    }
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    let n = ctx.random_range(lo, hi);
    Ok(Value::Number(if int_mode == 1.0 { n.round() } else { n }))
}

fn choose(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let candidates = if args.len() > 1 {
        let mut items = Vec::with_capacity(args.len());
        for i in 0..args.len() {
            if let Some(v) = args.value(i, ctx)? {
                items.push(v);
            }
        }
        items
    } else {
        args.pattern(0, ctx)?.into_items()
    };
    if candidates.is_empty() {
        return Err(FacetError::argument(args.raw(), "choose needs at least one value"));
    }
    let index = ctx.random_index(candidates.len());
    Ok(candidates[index].clone())
}

fn extremum(max: bool, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let mut leaves = Vec::new();
    for i in 0..args.len() {
        if let Some(v) = args.value(i, ctx)? {
            leaves.extend(v.leaves());
        }
    }
    let folded = leaves.into_iter().reduce(|a, b| if max { a.max(b) } else { a.min(b) });
    Ok(Value::Number(folded.unwrap_or(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str) -> Value {
        evaluate(text, &mut EvalContext::seeded(9)).unwrap()
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3"), Value::Number(9.0));
        assert_eq!(eval("-2 ^ 2"), Value::Number(-4.0));
        assert_eq!(eval("2 ^ 3 ^ 2"), Value::Number(512.0));
        assert_eq!(eval("7 % 4"), Value::Number(3.0));
    }

    #[test]
    fn test_variables() {
        assert_eq!(eval("bpm * 2"), Value::Number(180.0));
        assert!(evaluate("nope", &mut EvalContext::seeded(0)).is_err());
    }

    #[test]
    fn test_sequence_broadcast() {
        assert_eq!(eval("[1, 2, 3] * 2"), Value::seq([2.0, 4.0, 6.0]));
        assert_eq!(eval("10 - [1, 2]"), Value::seq([9.0, 8.0]));
    }

    #[test]
    fn test_scalar_helpers() {
        assert_eq!(eval("mtof(69)"), Value::Number(440.0));
        assert_eq!(eval("round(ftom(880))"), Value::Number(81.0));
        assert_eq!(eval("max(1, [5, 2], 3)"), Value::Number(5.0));
        let n = eval("random(2, 4, 1)").as_number().unwrap();
        assert!((2.0..=4.0).contains(&n) && n.fract() == 0.0);
        assert!(evaluate("random(0, 1, 5)", &mut EvalContext::seeded(0)).is_err());
    }

    #[test]
    fn test_generator_calls_and_chains() {
        assert_eq!(eval("ramp(0, 1, 4)"), Value::seq([0.0, 0.25, 0.5, 0.75]));
        assert_eq!(eval("ramp(0, 1, 4).reverse()"), Value::seq([0.75, 0.5, 0.25, 0.0]));
        assert_eq!(eval("data([1 2]).gain(3)"), Value::seq([3.0, 6.0]));
    }

    #[test]
    fn test_deep_nesting_is_an_error() {
        let depth = 200_000;
        let text = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert!(matches!(
            evaluate(&text, &mut EvalContext::seeded(0)),
            Err(FacetError::ArgumentParse { .. })
        ));
        let shallow = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(eval(&shallow), Value::Number(1.0));
    }

    #[test]
    fn test_errors_name_fragment() {
        let err = evaluate("sine(1, 8", &mut EvalContext::seeded(0)).unwrap_err();
        assert!(matches!(err, FacetError::ArgumentParse { .. }));
        assert!(evaluate("frobnicate(1)", &mut EvalContext::seeded(0)).is_err());
        assert!(evaluate("1 2", &mut EvalContext::seeded(0)).is_err());
    }
}
