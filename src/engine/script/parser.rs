//! Parser for the script engine's statement language.
//!
//! Statements are separated by `;` or newlines. A statement is an assignment
//! (`$name = <pipeline>`, `$name += <expr>`), a control flow construct
//! (`if`, `for`, `foreach`) or a pipeline of stages joined by `|`, optionally
//! redirected to `$null`. A stage is a command with arguments, a native
//! program invoked through `&`, or an expression.

use lazy_static::lazy_static;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_while, take_while1},
    character::complete::{anychar, char, digit1, satisfy},
    combinator::{map, map_res, not, opt, recognize, value},
    error::{context, VerboseError},
    multi::{fold_many0, many0, many0_count, many1_count, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use regex::Regex;
use thiserror::Error;

use crate::value::Value;

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

lazy_static! {
    static ref SCOPE_PREFIX: Regex =
        Regex::new(r"(?i)^(global|script|local|private):").expect("valid scope regex");
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assignment { name: String, pipeline: Pipeline },
    Pipeline(Pipeline),
    If {
        branches: Vec<(Expr, Vec<Statement>)>,
        otherwise: Option<Vec<Statement>>,
    },
    For {
        init: Option<Box<Statement>>,
        condition: Option<Expr>,
        step: Option<Box<Statement>>,
        body: Vec<Statement>,
    },
    Foreach {
        variable: String,
        collection: Expr,
        body: Vec<Statement>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    /// `> $null`
    pub discard_output: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Command { name: String, args: Vec<Argument> },
    Native { program: Expr, args: Vec<Argument> },
    Expression(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Parameter(String),
    Value(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Literal(String),
    Variable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Bareword(String),
    Variable(String),
    /// `$$`
    LastToken,
    /// `$^`
    FirstToken,
    Interpolated(Vec<StringPart>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Map(Vec<(String, Expr)>),
    List(Vec<Expr>),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unexpected token '{near}' at line {line}, column {column}")]
    UnexpectedToken {
        line: usize,
        column: usize,
        near: String,
    },
}

pub fn parse_script(source: &str) -> Result<Vec<Statement>, ParseError> {
    let normalized = source.replace("\r\n", "\n");
    match script(&normalized) {
        Ok((rest, statements)) if rest.trim().is_empty() => Ok(statements),
        Ok((rest, _)) => Err(unexpected(&normalized, rest)),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let rest = e.errors.first().map_or(normalized.as_str(), |(i, _)| *i);
            Err(unexpected(&normalized, rest))
        }
        Err(nom::Err::Incomplete(_)) => Err(unexpected(&normalized, "")),
    }
}

fn unexpected(source: &str, rest: &str) -> ParseError {
    let offset = source.len() - rest.len();
    let consumed = &source[..offset];
    let line = consumed.matches('\n').count() + 1;
    let column = consumed.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    let near = rest
        .chars()
        .take_while(|c| *c != '\n')
        .take(20)
        .collect::<String>();
    ParseError::UnexpectedToken { line, column, near }
}

fn is_space(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\r'
}

fn is_bareword_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, ';' | '|' | '>' | ')' | '}')
}

fn line_continuation(input: &str) -> ParserResult<&str> {
    recognize(pair(char('`'), char('\n')))(input)
}

fn ws0(input: &str) -> ParserResult<&str> {
    recognize(many0_count(alt((take_while1(is_space), line_continuation))))(input)
}

fn ws1(input: &str) -> ParserResult<&str> {
    recognize(many1_count(alt((take_while1(is_space), line_continuation))))(input)
}

fn ws_newlines0(input: &str) -> ParserResult<&str> {
    take_while(|c| is_space(c) || c == '\n')(input)
}

fn comment(input: &str) -> ParserResult<&str> {
    recognize(pair(char('#'), take_while(|c| c != '\n')))(input)
}

fn separators(input: &str) -> ParserResult<()> {
    value(
        (),
        many0_count(alt((
            take_while1(|c| is_space(c) || c == ';' || c == '\n'),
            comment,
            line_continuation,
        ))),
    )(input)
}

fn script(input: &str) -> ParserResult<Vec<Statement>> {
    preceded(separators, many0(terminated(statement, separators)))(input)
}

fn statement(input: &str) -> ParserResult<Statement> {
    context(
        "statement",
        alt((if_statement, foreach_loop, for_loop, simple_statement)),
    )(input)
}

fn simple_statement(input: &str) -> ParserResult<Statement> {
    alt((
        assignment,
        compound_assignment,
        map(pipeline, Statement::Pipeline),
    ))(input)
}

fn assignment(input: &str) -> ParserResult<Statement> {
    map(
        tuple((variable_name, ws0, char('='), ws0, pipeline)),
        |(name, _, _, _, pipeline)| Statement::Assignment { name, pipeline },
    )(input)
}

/// `$x += e` is `$x = $x + e`.
fn compound_assignment(input: &str) -> ParserResult<Statement> {
    map(
        tuple((
            variable_name,
            ws0,
            alt((
                value(BinaryOp::Add, tag("+=")),
                value(BinaryOp::Sub, tag("-=")),
                value(BinaryOp::Mul, tag("*=")),
                value(BinaryOp::Div, tag("/=")),
            )),
            ws0,
            expression,
        )),
        |(name, _, op, _, rhs)| Statement::Assignment {
            pipeline: Pipeline {
                stages: vec![Stage::Expression(Expr::Binary {
                    op,
                    lhs: Box::new(Expr::Variable(name.clone())),
                    rhs: Box::new(rhs),
                })],
                discard_output: false,
            },
            name,
        },
    )(input)
}

fn block(input: &str) -> ParserResult<Vec<Statement>> {
    context(
        "block",
        delimited(
            pair(char('{'), separators),
            many0(terminated(statement, separators)),
            char('}'),
        ),
    )(input)
}

fn condition(input: &str) -> ParserResult<Expr> {
    delimited(
        tuple((ws0, char('('), ws_newlines0)),
        expression,
        pair(ws_newlines0, char(')')),
    )(input)
}

fn if_statement(input: &str) -> ParserResult<Statement> {
    map(
        tuple((
            preceded(tag_no_case("if"), pair(condition, preceded(ws_newlines0, block))),
            many0(preceded(
                pair(ws_newlines0, tag_no_case("elseif")),
                pair(condition, preceded(ws_newlines0, block)),
            )),
            opt(preceded(
                tuple((ws_newlines0, tag_no_case("else"), ws_newlines0)),
                block,
            )),
        )),
        |(first, rest, otherwise)| {
            let mut branches = vec![first];
            branches.extend(rest);
            Statement::If {
                branches,
                otherwise,
            }
        },
    )(input)
}

fn for_loop(input: &str) -> ParserResult<Statement> {
    map(
        tuple((
            tag_no_case("for"),
            ws0,
            char('('),
            ws_newlines0,
            opt(simple_statement),
            ws_newlines0,
            char(';'),
            ws_newlines0,
            opt(expression),
            ws_newlines0,
            char(';'),
            ws_newlines0,
            opt(simple_statement),
            ws_newlines0,
            char(')'),
            ws_newlines0,
            block,
        )),
        |(_, _, _, _, init, _, _, _, condition, _, _, _, step, _, _, _, body)| Statement::For {
            init: init.map(Box::new),
            condition,
            step: step.map(Box::new),
            body,
        },
    )(input)
}

fn foreach_loop(input: &str) -> ParserResult<Statement> {
    map(
        tuple((
            tag_no_case("foreach"),
            ws0,
            char('('),
            ws_newlines0,
            variable_name,
            ws1,
            tag_no_case("in"),
            ws1,
            expression,
            ws_newlines0,
            char(')'),
            ws_newlines0,
            block,
        )),
        |(_, _, _, _, variable, _, _, _, collection, _, _, _, body)| Statement::Foreach {
            variable,
            collection,
            body,
        },
    )(input)
}

fn pipeline(input: &str) -> ParserResult<Pipeline> {
    map(
        pair(
            separated_list1(tuple((ws0, char('|'), ws0)), stage),
            opt(null_redirect),
        ),
        |(stages, redirect)| Pipeline {
            stages,
            discard_output: redirect.is_some(),
        },
    )(input)
}

fn null_redirect(input: &str) -> ParserResult<&str> {
    preceded(tuple((ws0, char('>'), ws0)), tag_no_case("$null"))(input)
}

fn stage(input: &str) -> ParserResult<Stage> {
    context(
        "pipeline stage",
        alt((native_stage, command_stage, map(expression, Stage::Expression))),
    )(input)
}

fn native_stage(input: &str) -> ParserResult<Stage> {
    map(
        preceded(pair(char('&'), ws0), pair(argument_value, arguments)),
        |(program, args)| Stage::Native { program, args },
    )(input)
}

fn command_stage(input: &str) -> ParserResult<Stage> {
    map(pair(command_name, arguments), |(name, args)| Stage::Command {
        name: name.to_string(),
        args,
    })(input)
}

fn command_name(input: &str) -> ParserResult<&str> {
    alt((
        tag("%"),
        recognize(pair(
            satisfy(|c| c.is_ascii_alphabetic()),
            take_while(|c: char| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '\\' | ':')),
        )),
    ))(input)
}

fn arguments(input: &str) -> ParserResult<Vec<Argument>> {
    many0(preceded(ws1, preceded(not(char('#')), argument)))(input)
}

fn argument(input: &str) -> ParserResult<Argument> {
    alt((
        map(parameter, |name: &str| Argument::Parameter(name.to_string())),
        map(argument_value, Argument::Value),
    ))(input)
}

fn parameter(input: &str) -> ParserResult<&str> {
    terminated(
        preceded(
            char('-'),
            recognize(pair(
                satisfy(|c| c.is_ascii_alphabetic()),
                take_while(|c: char| c.is_alphanumeric() || c == '_'),
            )),
        ),
        not(satisfy(is_bareword_char)),
    )(input)
}

/// In argument position a primary must stand alone; anything glued to it
/// makes the whole word a bareword (`/a/b`, `--help`, `1st`).
fn argument_value(input: &str) -> ParserResult<Expr> {
    alt((terminated(primary, not(satisfy(is_bareword_char))), bareword))(input)
}

fn bareword(input: &str) -> ParserResult<Expr> {
    map(take_while1(is_bareword_char), |word: &str| {
        Expr::Bareword(word.to_string())
    })(input)
}

pub fn expression(input: &str) -> ParserResult<Expr> {
    let (input, lhs) = additive(input)?;
    let (input, rhs) = opt(pair(delimited(ws0, comparison_op, ws0), additive))(input)?;
    Ok((
        input,
        match rhs {
            Some((op, rhs)) => Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            None => lhs,
        },
    ))
}

fn comparison_op(input: &str) -> ParserResult<BinaryOp> {
    terminated(
        preceded(
            char('-'),
            alt((
                value(BinaryOp::Eq, tag_no_case("eq")),
                value(BinaryOp::Ne, tag_no_case("ne")),
                value(BinaryOp::Le, tag_no_case("le")),
                value(BinaryOp::Lt, tag_no_case("lt")),
                value(BinaryOp::Ge, tag_no_case("ge")),
                value(BinaryOp::Gt, tag_no_case("gt")),
            )),
        ),
        not(satisfy(|c| c.is_alphanumeric())),
    )(input)
}

fn additive(input: &str) -> ParserResult<Expr> {
    let (input, first) = term(input)?;
    fold_many0(
        pair(delimited(ws0, additive_op, ws0), term),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    )(input)
}

fn term(input: &str) -> ParserResult<Expr> {
    let (input, first) = primary(input)?;
    fold_many0(
        pair(delimited(ws0, multiplicative_op, ws0), primary),
        move || first.clone(),
        |lhs, (op, rhs)| Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    )(input)
}

fn additive_op(input: &str) -> ParserResult<BinaryOp> {
    alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, terminated(char('-'), not(satisfy(|c| c.is_ascii_alphabetic())))),
    ))(input)
}

fn multiplicative_op(input: &str) -> ParserResult<BinaryOp> {
    alt((value(BinaryOp::Mul, char('*')), value(BinaryOp::Div, char('/'))))(input)
}

fn primary(input: &str) -> ParserResult<Expr> {
    context(
        "expression",
        alt((
            parenthesized,
            map_literal,
            list_literal,
            cast,
            token_variable,
            variable_or_constant,
            number,
            map(single_quoted, |s| Expr::Literal(Value::String(s))),
            double_quoted,
        )),
    )(input)
}

fn parenthesized(input: &str) -> ParserResult<Expr> {
    delimited(
        pair(char('('), ws_newlines0),
        expression,
        pair(ws_newlines0, char(')')),
    )(input)
}

fn map_literal(input: &str) -> ParserResult<Expr> {
    map(
        delimited(
            pair(tag("@{"), separators),
            many0(terminated(map_entry, separators)),
            char('}'),
        ),
        Expr::Map,
    )(input)
}

fn map_entry(input: &str) -> ParserResult<(String, Expr)> {
    map(
        tuple((map_key, ws0, char('='), ws0, expression)),
        |(key, _, _, _, value)| (key, value),
    )(input)
}

fn map_key(input: &str) -> ParserResult<String> {
    alt((map(identifier, str::to_string), single_quoted))(input)
}

fn list_literal(input: &str) -> ParserResult<Expr> {
    map(
        delimited(
            pair(tag("@("), ws_newlines0),
            separated_list0(tuple((ws_newlines0, char(','), ws_newlines0)), expression),
            pair(ws_newlines0, char(')')),
        ),
        Expr::List,
    )(input)
}

/// `[Type]expr`; the type is accepted and ignored.
fn cast(input: &str) -> ParserResult<Expr> {
    preceded(delimited(char('['), identifier, char(']')), primary)(input)
}

fn identifier(input: &str) -> ParserResult<&str> {
    recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '.'),
    ))(input)
}

fn token_variable(input: &str) -> ParserResult<Expr> {
    alt((
        value(Expr::LastToken, tag("$$")),
        value(Expr::FirstToken, tag("$^")),
    ))(input)
}

fn variable_name(input: &str) -> ParserResult<String> {
    map(
        preceded(
            char('$'),
            take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == ':'),
        ),
        |name: &str| {
            SCOPE_PREFIX
                .replace(name.trim_end_matches(':'), "")
                .into_owned()
        },
    )(input)
}

fn variable_or_constant(input: &str) -> ParserResult<Expr> {
    map(variable_name, |name| match name.to_ascii_lowercase().as_str() {
        "true" => Expr::Literal(Value::Boolean(true)),
        "false" => Expr::Literal(Value::Boolean(false)),
        "null" => Expr::Literal(Value::Null),
        _ => Expr::Variable(name),
    })(input)
}

fn number(input: &str) -> ParserResult<Expr> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        |text: &str| -> Result<Expr, std::num::ParseFloatError> {
            if !text.contains('.') {
                if let Ok(i) = text.parse::<i64>() {
                    return Ok(Expr::Literal(Value::Integer(i)));
                }
            }
            Ok(Expr::Literal(Value::Float(text.parse()?)))
        },
    )(input)
}

fn single_quoted(input: &str) -> ParserResult<String> {
    map(
        delimited(
            char('\''),
            many0(alt((
                map(tag("''"), |_| "'".to_string()),
                map(is_not("'"), str::to_string),
            ))),
            char('\''),
        ),
        |parts: Vec<String>| parts.concat(),
    )(input)
}

fn double_quoted(input: &str) -> ParserResult<Expr> {
    map(
        delimited(char('"'), many0(string_part), char('"')),
        |parts| Expr::Interpolated(merge_literals(parts)),
    )(input)
}

fn string_part(input: &str) -> ParserResult<StringPart> {
    alt((
        map(preceded(char('`'), anychar), |c| {
            StringPart::Literal(escape(c).to_string())
        }),
        map(tag("\"\""), |_| StringPart::Literal("\"".to_string())),
        map(variable_name, StringPart::Variable),
        map(char('$'), |_| StringPart::Literal("$".to_string())),
        map(is_not("`\"$"), |s: &str| StringPart::Literal(s.to_string())),
    ))(input)
}

fn escape(c: char) -> String {
    match c {
        'n' => "\n".to_string(),
        't' => "\t".to_string(),
        'r' => "\r".to_string(),
        '0' => "\0".to_string(),
        other => other.to_string(),
    }
}

fn merge_literals(parts: Vec<StringPart>) -> Vec<StringPart> {
    let mut merged: Vec<StringPart> = Vec::with_capacity(parts.len());
    for part in parts {
        match (merged.last_mut(), part) {
            (Some(StringPart::Literal(previous)), StringPart::Literal(next)) => {
                previous.push_str(&next)
            }
            (_, part) => merged.push(part),
        }
    }
    merged
}
