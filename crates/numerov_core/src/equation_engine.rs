use crate::binding::{Binding, Var};
use crate::error::{ExprError, ParseError};
use crate::expression::{BinaryOp, Expr, Function, UnaryOp};
use crate::traits::{Curvature, Scalar};
use std::cell::RefCell;

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Scalar` values (f32 or f64).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the value of a variable slot onto the stack.
    /// Slots correspond to the order variables were given to the `Compiler`.
    LoadVar(usize),
    /// Pushes the result of a wrapped function (by index into `Bytecode::functions`).
    Call(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops top value (a), pushes exp(a).
    Exp,
    /// Pops top value (a), pushes sqrt(a).
    Sqrt,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
    pub slots: Vec<Var>,
    pub functions: Vec<Function>,
}

/// Stack-based Virtual Machine for evaluating compiled expressions.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `vars`: One value per compiler slot (read-only).
/// - `stack`: A mutable buffer for intermediate computations.
///
/// Returns the result of the evaluation (the value left on the stack).
pub struct VM;

impl VM {
    /// Executes the bytecode.
    ///
    /// # Type Parameters
    /// * `T`: The scalar type (e.g., `f32` or `f64`).
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        vars: &[T],
        stack: &mut Vec<T>,
    ) -> Result<T, ExprError> {
        stack.clear();

        for op in &bytecode.ops {
            match op {
                OpCode::LoadConst(val) => stack.push(T::lift(*val)),
                OpCode::LoadVar(idx) => {
                    let value = vars
                        .get(*idx)
                        .copied()
                        .ok_or(ExprError::MalformedProgram("variable slot out of range"))?;
                    stack.push(value);
                }
                OpCode::Call(idx) => {
                    let function = bytecode
                        .functions
                        .get(*idx)
                        .ok_or(ExprError::MalformedProgram("function index out of range"))?;
                    let bindings: Vec<Binding<T>> = bytecode
                        .slots
                        .iter()
                        .zip(vars)
                        .map(|(var, value)| Binding::new(*var, *value))
                        .collect();
                    stack.push(function.call(&bindings)?);
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    let op = match op {
                        OpCode::Add => BinaryOp::Add,
                        OpCode::Sub => BinaryOp::Sub,
                        OpCode::Mul => BinaryOp::Mul,
                        _ => BinaryOp::Div,
                    };
                    stack.push(op.apply(a, b));
                }
                OpCode::Neg => {
                    let a = pop(stack)?;
                    stack.push(-a);
                }
                OpCode::Exp => {
                    let a = pop(stack)?;
                    stack.push(a.exp());
                }
                OpCode::Sqrt => {
                    let a = pop(stack)?;
                    stack.push(a.sqrt());
                }
            }
        }

        let result = pop(stack)?;
        if stack.is_empty() {
            Ok(result)
        } else {
            Err(ExprError::MalformedProgram("values left on the stack"))
        }
    }
}

fn pop<T>(stack: &mut Vec<T>) -> Result<T, ExprError> {
    stack
        .pop()
        .ok_or(ExprError::MalformedProgram("stack underflow"))
}

/// Compiles an `Expr` graph into `Bytecode`.
/// Resolves variables to slot indices; a variable without a slot is rejected here, before
/// any evaluation happens.
pub struct Compiler {
    pub slots: Vec<Var>,
}

impl Compiler {
    pub fn new(slots: &[Var]) -> Self {
        Self {
            slots: slots.to_vec(),
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, ExprError> {
        let mut bytecode = Bytecode {
            ops: Vec::new(),
            slots: self.slots.clone(),
            functions: Vec::new(),
        };
        self.compile_recursive(expr, &mut bytecode)?;
        Ok(bytecode)
    }

    fn compile_recursive(&self, expr: &Expr, bytecode: &mut Bytecode) -> Result<(), ExprError> {
        match expr {
            Expr::Constant(value) => bytecode.ops.push(OpCode::LoadConst(*value)),
            Expr::Variable(var) => {
                let slot = self
                    .slots
                    .iter()
                    .position(|slot| slot == var)
                    .ok_or(ExprError::InvalidBinding(*var))?;
                bytecode.ops.push(OpCode::LoadVar(slot));
            }
            Expr::Function(function) => {
                if let Some(missing) = function
                    .dependencies()
                    .iter()
                    .find(|var| !self.slots.contains(var))
                {
                    return Err(ExprError::InvalidBinding(*missing));
                }
                bytecode.ops.push(OpCode::Call(bytecode.functions.len()));
                bytecode.functions.push(function.clone());
            }
            Expr::Binary(op, lhs, rhs) => {
                self.compile_recursive(lhs, bytecode)?;
                self.compile_recursive(rhs, bytecode)?;
                bytecode.ops.push(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, bytecode)?;
                bytecode.ops.push(match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::Exp => OpCode::Exp,
                    UnaryOp::Sqrt => OpCode::Sqrt,
                });
            }
            Expr::Derivative(source, wrt) => {
                let derivative = source.diff(*wrt)?;
                self.compile_recursive(&derivative, bytecode)?;
            }
        }
        Ok(())
    }
}

/// A curvature expression compiled against the slots `[r, k]`.
///
/// Interior mutability for the VM stack avoids an allocation per evaluation.
/// Note: This makes the curvature !Sync; build one per thread if the sweep is parallelized.
pub struct CompiledCurvature<T: Scalar> {
    pub bytecode: Bytecode,
    stack: RefCell<Vec<T>>,
}

impl<T: Scalar> CompiledCurvature<T> {
    pub fn new(expr: &Expr) -> Result<Self, ExprError> {
        let bytecode = Compiler::new(&[Var::R, Var::K]).compile(expr)?;
        Ok(Self {
            bytecode,
            stack: RefCell::new(Vec::with_capacity(64)),
        })
    }
}

impl<T: Scalar> Curvature<T> for CompiledCurvature<T> {
    fn evaluate(&self, r: T, k: T) -> Result<T, ExprError> {
        let mut stack = self.stack.borrow_mut();
        VM::execute(&self.bytecode, &[r, k], &mut stack)
    }
}

// --- Simple Parser ---

/// Deepest expression tree [`parse`] accepts, and the deepest parenthesis or prefix-minus
/// nesting. Evaluation, differentiation and compilation recurse once per tree level.
pub const MAX_DEPTH: usize = 256;

/// Parses a string expression into an `Expr` graph.
///
/// Identifiers resolve to variables by name (`r`, `k`, `x`, `y`, `z`) or to the constant
/// `pi`. Calls: `exp(a)`, `sqrt(a)`, and `d(a, var)` for a derivative node.
///
/// Inputs whose tree would be deeper than [`MAX_DEPTH`] are rejected with
/// [`ParseError::TooDeep`]; a flat sum of `n` terms is `n` levels deep.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
    };
    let (expr, _) = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ParseError::TrailingInput(token.describe())),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Comma,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number `{n}`"),
            Token::Identifier(name) => format!("identifier `{name}`"),
            Token::Plus => "`+`".to_string(),
            Token::Minus => "`-`".to_string(),
            Token::Star => "`*`".to_string(),
            Token::Slash => "`/`".to_string(),
            Token::Comma => "`,`".to_string(),
            Token::LParen => "`(`".to_string(),
            Token::RParen => "`)`".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E')
                    && !num_str.contains(|ch: char| ch == 'e' || ch == 'E')
                {
                    num_str.push(d);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            num_str.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| ParseError::InvalidNumber(num_str.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                ',' => Token::Comma,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => return Err(ParseError::UnexpectedChar(other)),
            };
            tokens.push(token);
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

/// A parsed subtree and its depth.
type Parsed = (Expr, usize);

fn deeper(depth: usize) -> Result<usize, ParseError> {
    if depth >= MAX_DEPTH {
        Err(ParseError::TooDeep(MAX_DEPTH))
    } else {
        Ok(depth + 1)
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token, label: &'static str) -> Result<(), ParseError> {
        match self.consume() {
            Some(token) if token == expected => Ok(()),
            _ => Err(ParseError::Expected(label)),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        if self.nesting >= MAX_DEPTH {
            return Err(ParseError::TooDeep(MAX_DEPTH));
        }
        self.nesting += 1;
        Ok(())
    }

    fn parse_expression(&mut self) -> Result<Parsed, ParseError> {
        self.enter()?;
        let parsed = self.parse_sum();
        self.nesting -= 1;
        parsed
    }

    fn parse_sum(&mut self) -> Result<Parsed, ParseError> {
        let (mut left, mut depth) = self.parse_term()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            let (right, right_depth) = self.parse_term()?;
            depth = deeper(depth.max(right_depth))?;
            left = Expr::binary(op, left, right);
        }
        Ok((left, depth))
    }

    fn parse_term(&mut self) -> Result<Parsed, ParseError> {
        let (mut left, mut depth) = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.consume();
            let (right, right_depth) = self.parse_unary()?;
            depth = deeper(depth.max(right_depth))?;
            left = Expr::binary(op, left, right);
        }
        Ok((left, depth))
    }

    fn parse_unary(&mut self) -> Result<Parsed, ParseError> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            self.enter()?;
            let operand = self.parse_unary();
            self.nesting -= 1;
            let (expr, depth) = operand?;
            return Ok((Expr::unary(UnaryOp::Neg, expr), deeper(depth)?));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Parsed, ParseError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok((Expr::constant(n), 1)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume(); // eat '('
                    self.parse_call(name)
                } else if let Some(var) = Var::from_name(&name) {
                    Ok((Expr::var(var), 1))
                } else if name == "pi" {
                    Ok((Expr::constant(std::f64::consts::PI), 1))
                } else {
                    Err(ParseError::UnknownVariable(name))
                }
            }
            Some(Token::LParen) => {
                let parsed = self.parse_expression()?;
                self.expect(Token::RParen, ")")?;
                Ok(parsed)
            }
            Some(token) => Err(ParseError::UnexpectedToken(token.describe())),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Parsed, ParseError> {
        let mut args = vec![self.parse_expression()?];
        while let Some(Token::Comma) = self.peek() {
            self.consume();
            args.push(self.parse_expression()?);
        }
        self.expect(Token::RParen, ")")?;

        let expected = match name.as_str() {
            "exp" | "sqrt" => 1,
            "d" => 2,
            _ => return Err(ParseError::UnknownFunction(name)),
        };
        if args.len() != expected {
            return Err(ParseError::Arity {
                name,
                expected,
                got: args.len(),
            });
        }

        let mut args = args.into_iter();
        let (Some((first, depth)), second) = (args.next(), args.next()) else {
            return Err(ParseError::UnexpectedEnd);
        };
        let depth = deeper(depth)?;
        match (name.as_str(), second) {
            ("exp", _) => Ok((Expr::unary(UnaryOp::Exp, first), depth)),
            ("sqrt", _) => Ok((Expr::unary(UnaryOp::Sqrt, first), depth)),
            (_, Some((Expr::Variable(wrt), _))) => Ok((first.derivative(wrt), depth)),
            (_, _) => Err(ParseError::Expected("a variable as the second argument of d")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::exp;

    fn eval_rk(expr: &Expr, r: f64, k: f64) -> f64 {
        expr.eval(&[Binding::r(r), Binding::k(k)])
            .expect("r and k should be bound")
    }

    #[test]
    fn parse_respects_precedence_and_associativity() {
        let expr = parse("1 - 2 - 3 * 4 / 2").expect("should parse");
        assert_eq!(expr.eval::<f64>(&[]), Ok(1.0 - 2.0 - 3.0 * 4.0 / 2.0));
        let expr = parse("-(r + 1) * -k").expect("should parse");
        assert_eq!(eval_rk(&expr, 2.0, 3.0), 9.0);
    }

    #[test]
    fn parse_builds_the_same_graph_as_operators() {
        let parsed = parse("exp(-r) / (k * k)").expect("should parse");
        let built = exp(-Var::R) / (Var::K * Var::K);
        assert_eq!(parsed, built);
    }

    #[test]
    fn parse_reads_back_display_output() {
        let source = "sqrt(r * 4) - exp(-(k / 2.5)) + (-1.5) * d(r * r * k, r)";
        let parsed = parse(source).expect("should parse");
        let reparsed = parse(&parsed.to_string()).expect("display output should parse");
        for (r, k) in [(0.5, 1.0), (2.0, -3.0), (7.25, 0.125)] {
            assert_eq!(eval_rk(&parsed, r, k), eval_rk(&reparsed, r, k));
        }
    }

    #[test]
    fn parse_supports_scientific_notation_and_pi() {
        let expr = parse("1.5e2 + 2E-1 * pi").expect("should parse");
        let value: f64 = expr.eval(&[]).expect("constant expression");
        assert!((value - (150.0 + 0.2 * std::f64::consts::PI)).abs() < 1e-12);
    }

    #[test]
    fn parse_derivative_form_builds_derivative_node() {
        let expr = parse("d(x * x * y, x)").expect("should parse");
        assert!(matches!(expr, Expr::Derivative(_, Var::X)));
        let value = expr
            .eval(&[Binding::new(Var::X, 3.0), Binding::new(Var::Y, 2.0)])
            .expect("bound");
        assert_eq!(value, 12.0);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert_eq!(parse("1 +"), Err(ParseError::UnexpectedEnd));
        assert_eq!(parse("r ^ 2"), Err(ParseError::UnexpectedChar('^')));
        assert_eq!(parse("(r + 1"), Err(ParseError::Expected(")")));
        assert_eq!(
            parse("theta * 2"),
            Err(ParseError::UnknownVariable("theta".to_string()))
        );
        assert_eq!(
            parse("sin(r)"),
            Err(ParseError::UnknownFunction("sin".to_string()))
        );
        assert_eq!(
            parse("exp(r, k)"),
            Err(ParseError::Arity {
                name: "exp".to_string(),
                expected: 1,
                got: 2,
            })
        );
        assert!(matches!(parse("d(r, 2)"), Err(ParseError::Expected(_))));
        assert!(matches!(parse("r k"), Err(ParseError::TrailingInput(_))));
        assert!(matches!(parse("1..2"), Err(ParseError::InvalidNumber(_))));
    }

    #[test]
    fn parse_accepts_chains_up_to_the_depth_limit() {
        let expr = parse(&vec!["r"; MAX_DEPTH].join(" + ")).expect("should parse");
        let expected = MAX_DEPTH as f64;
        assert_eq!(expr.eval(&[Binding::r(1.0)]), Ok(expected));
        let derivative = expr.diff(Var::R).expect("derivative");
        assert_eq!(derivative.eval(&[Binding::r(1.0)]), Ok(expected));
        let compiled = CompiledCurvature::<f64>::new(&expr).expect("should compile");
        assert_eq!(compiled.evaluate(1.0, 0.0), Ok(expected));
    }

    #[test]
    fn parse_rejects_inputs_nested_past_the_depth_limit() {
        let too_deep = Err(ParseError::TooDeep(MAX_DEPTH));
        assert_eq!(parse(&vec!["r"; MAX_DEPTH + 1].join(" + ")), too_deep);
        assert_eq!(parse(&vec!["r"; 50_000].join(" + ")), too_deep);
        assert_eq!(parse(&vec!["r"; 50_000].join(" * ")), too_deep);
        assert_eq!(parse(&format!("{}r", "-".repeat(50_000))), too_deep);
        let parens = format!("{}r{}", "(".repeat(50_000), ")".repeat(50_000));
        assert_eq!(parse(&parens), too_deep);
        let calls = format!("{}r{}", "exp(".repeat(50_000), ")".repeat(50_000));
        assert_eq!(parse(&calls), too_deep);
    }

    #[test]
    fn compiled_bytecode_matches_tree_evaluation() {
        let expr = parse("k * k - 4 / r + sqrt(r) * exp(-k) - d(r * r, r)").expect("should parse");
        let bytecode = Compiler::new(&[Var::R, Var::K])
            .compile(&expr)
            .expect("should compile");
        let mut stack = Vec::new();
        for (r, k) in [(0.5, 1.0), (2.0, -3.0), (7.25, 0.125)] {
            let compiled = VM::execute(&bytecode, &[r, k], &mut stack).expect("should execute");
            assert_eq!(compiled, eval_rk(&expr, r, k));
        }
    }

    #[test]
    fn compiler_rejects_variables_without_slots() {
        let expr = Var::R * Var::Z;
        let err = Compiler::new(&[Var::R, Var::K])
            .compile(&expr)
            .expect_err("z has no slot");
        assert_eq!(err, ExprError::InvalidBinding(Var::Z));

        let function = Function::unary("f", Var::Y, |y| y + 1.0);
        let err = CompiledCurvature::<f64>::new(&(Expr::from(function) * Var::R))
            .err()
            .expect("y has no slot");
        assert_eq!(err, ExprError::InvalidBinding(Var::Y));
    }

    #[test]
    fn compiled_functions_receive_slot_bindings() {
        let potential = Function::unary("yukawa", Var::R, |r| (-r).exp() / r);
        let expr = Var::K * Var::K - Expr::from(potential);
        let curvature = CompiledCurvature::<f64>::new(&expr).expect("should compile");
        let value = curvature.evaluate(2.0, 3.0).expect("should evaluate");
        assert!((value - (9.0 - (-2.0f64).exp() / 2.0)).abs() < 1e-12);
    }

    #[test]
    fn vm_reports_malformed_programs() {
        let bytecode = Bytecode {
            ops: vec![OpCode::LoadConst(1.0), OpCode::Add],
            slots: Vec::new(),
            functions: Vec::new(),
        };
        let mut stack: Vec<f64> = Vec::new();
        assert!(matches!(
            VM::execute(&bytecode, &[], &mut stack),
            Err(ExprError::MalformedProgram(_))
        ));
    }
}
