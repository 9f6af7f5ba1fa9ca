use std::rc::Rc;

use pest::error::{Error, ErrorVariant};
use pest::iterators::Pair;
use pest::{Parser, Position};
use pest_derive::Parser;

use super::ast::*;

#[derive(Parser)]
#[grammar = "parser/snippet_grammar.pest"] // relative to src
pub struct SnippetParser;

const TAB_WIDTH: usize = 2;

pub fn parse_to_token_tree(script: &str) -> Result<String, String> {
    let mut tree = vec![];
    match SnippetParser::parse(Rule::chunk, script) {
        Ok(pairs) => {
            for pair in pairs {
                tree.push(pair_to_string(pair, 0).join("\n"));
            }
        }
        Err(rule) => {
            return Err(format!("Parse error due to {:?}", rule));
        }
    }
    Ok(tree.join("\n"))
}

fn pair_to_string(pair: Pair<Rule>, level: usize) -> Vec<String> {
    let mut tree = vec![];
    let span = pair.as_span();
    let rule_name = format!(
        "{:?} => ({},{}) #{:?}",
        pair.as_rule(),
        span.start(),
        span.end(),
        span.as_str()
    );
    let string_pads = " ".repeat(level * TAB_WIDTH);
    tree.push(format!("{}{}", string_pads, rule_name));
    for child_pair in pair.into_inner() {
        tree.append(pair_to_string(child_pair, level + 1).as_mut());
    }
    tree
}

pub fn parse_chunk(script: &str) -> Result<Chunk, Error<Rule>> {
    let mut pairs = SnippetParser::parse(Rule::chunk, script)?;
    let block = pairs
        .next()
        .and_then(|chunk| chunk.into_inner().find(|p| p.as_rule() == Rule::block));
    match block {
        Some(block) => Ok(Chunk {
            block: build_block(block)?,
        }),
        None => Err(Error::new_from_pos(
            ErrorVariant::CustomError {
                message: "empty parse tree".to_string(),
            },
            Position::from_start(script),
        )),
    }
}

fn custom_error(pair: &Pair<Rule>, message: &str) -> Error<Rule> {
    Error::new_from_span(
        ErrorVariant::CustomError {
            message: message.to_string(),
        },
        pair.as_span(),
    )
}

fn get_unexpected_error(pair: &Pair<Rule>) -> Error<Rule> {
    custom_error(pair, &format!("unexpected {:?}", pair.as_rule()))
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_local
            | Rule::kw_function
            | Rule::kw_return
            | Rule::kw_end
            | Rule::kw_if
            | Rule::kw_then
            | Rule::kw_else
    )
}

/// Children of `pair` with keyword tokens removed.
fn significant(pair: Pair<Rule>) -> Vec<Pair<Rule>> {
    pair.into_inner()
        .filter(|p| !is_keyword(p.as_rule()))
        .collect()
}

fn build_block(pair: Pair<Rule>) -> Result<Block, Error<Rule>> {
    let mut block = Block::default();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::local_stat => block.stats.push(build_local_stat(p)?),
            Rule::function_stat => block.stats.push(build_function_stat(p)?),
            Rule::assign_stat => block.stats.push(build_assign_stat(p)?),
            Rule::call_stat => block.stats.push(build_call_stat(p)?),
            Rule::if_stat => block.stats.push(build_if_stat(p)?),
            Rule::ret_stat => block.ret = Some(build_ret_stat(p)?),
            _ => return Err(get_unexpected_error(&p)),
        }
    }
    Ok(block)
}

fn build_local_stat(pair: Pair<Rule>) -> Result<Stat, Error<Rule>> {
    let err = custom_error(&pair, "missing local name");
    let mut inner = significant(pair).into_iter();
    let name = match inner.next() {
        Some(n) => n.as_str().to_string(),
        None => return Err(err),
    };
    let value = match inner.next() {
        Some(e) => Some(build_expr(e)?),
        None => None,
    };
    Ok(Stat::Local { name, value })
}

fn build_function_stat(pair: Pair<Rule>) -> Result<Stat, Error<Rule>> {
    let err = custom_error(&pair, "malformed function statement");
    let mut inner = significant(pair).into_iter();
    match (inner.next(), inner.next()) {
        (Some(name), Some(body)) => {
            let name = name.as_str().to_string();
            let body = build_func_body(body, Some(name.clone()))?;
            Ok(Stat::Function {
                name,
                body: Rc::new(body),
            })
        }
        _ => Err(err),
    }
}

fn build_assign_stat(pair: Pair<Rule>) -> Result<Stat, Error<Rule>> {
    let err = custom_error(&pair, "malformed assignment");
    let mut inner = pair.into_inner();
    match (inner.next(), inner.next()) {
        (Some(name), Some(value)) => Ok(Stat::Assign {
            name: name.as_str().to_string(),
            value: build_expr(value)?,
        }),
        _ => Err(err),
    }
}

fn build_call_stat(pair: Pair<Rule>) -> Result<Stat, Error<Rule>> {
    let err = custom_error(&pair, "syntax error: statement is not a function call");
    match pair.into_inner().next() {
        Some(suffixed) => match build_suffixed(suffixed)? {
            call @ Expr::Call(..) => Ok(Stat::Call(call)),
            _ => Err(err),
        },
        None => Err(err),
    }
}

fn build_if_stat(pair: Pair<Rule>) -> Result<Stat, Error<Rule>> {
    let err = custom_error(&pair, "malformed if statement");
    let mut inner = significant(pair).into_iter();
    let (cond, then_block) = match (inner.next(), inner.next()) {
        (Some(c), Some(b)) => (build_expr(c)?, build_block(b)?),
        _ => return Err(err),
    };
    let else_block = match inner.next() {
        Some(b) => Some(build_block(b)?),
        None => None,
    };
    Ok(Stat::If {
        cond,
        then_block,
        else_block,
    })
}

fn build_ret_stat(pair: Pair<Rule>) -> Result<Vec<Expr>, Error<Rule>> {
    match significant(pair).into_iter().next() {
        Some(list) => build_expr_list(list),
        None => Ok(vec![]),
    }
}

fn build_expr_list(pair: Pair<Rule>) -> Result<Vec<Expr>, Error<Rule>> {
    pair.into_inner().map(build_expr).collect()
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr, Error<Rule>> {
    let mut inner = pair.into_inner();
    let mut left = match inner.next() {
        Some(p) => build_concat(p)?,
        None => return Ok(Expr::Nil),
    };
    while let (Some(op), Some(rhs)) = (inner.next(), inner.next()) {
        let right = build_concat(rhs)?;
        left = if op.as_str() == "==" {
            Expr::Equal(Box::new(left), Box::new(right))
        } else {
            Expr::NotEqual(Box::new(left), Box::new(right))
        };
    }
    Ok(left)
}

fn build_concat(pair: Pair<Rule>) -> Result<Expr, Error<Rule>> {
    let mut operands = vec![];
    for p in pair.into_inner() {
        if p.as_rule() == Rule::unary_expr {
            operands.push(build_unary(p)?);
        }
    }
    // `..` is right associative.
    let mut iter = operands.into_iter().rev();
    let mut acc = iter.next().unwrap_or(Expr::Nil);
    for lhs in iter {
        acc = Expr::Concat(Box::new(lhs), Box::new(acc));
    }
    Ok(acc)
}

fn build_unary(pair: Pair<Rule>) -> Result<Expr, Error<Rule>> {
    let mut nots = 0;
    let mut operand = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::not_op => nots += 1,
            _ => operand = Some(build_primary(p)?),
        }
    }
    let mut expr = operand.unwrap_or(Expr::Nil);
    for _ in 0..nots {
        expr = Expr::Not(Box::new(expr));
    }
    Ok(expr)
}

fn build_primary(pair: Pair<Rule>) -> Result<Expr, Error<Rule>> {
    match pair.as_rule() {
        Rule::nil_lit => Ok(Expr::Nil),
        Rule::true_lit => Ok(Expr::True),
        Rule::false_lit => Ok(Expr::False),
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| custom_error(&pair, "malformed number")),
        Rule::string => {
            let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Expr::Str(unescape(raw)))
        }
        Rule::vararg => Ok(Expr::Vararg),
        Rule::function_lit => {
            let err = custom_error(&pair, "malformed function");
            match significant(pair).into_iter().next() {
                Some(body) => Ok(Expr::Function(Rc::new(build_func_body(body, None)?))),
                None => Err(err),
            }
        }
        Rule::suffixed => build_suffixed(pair),
        _ => Err(get_unexpected_error(&pair)),
    }
}

fn build_suffixed(pair: Pair<Rule>) -> Result<Expr, Error<Rule>> {
    let err = custom_error(&pair, "malformed expression");
    let mut inner = pair.into_inner();
    let mut expr = match inner.next() {
        Some(atom) => match atom.as_rule() {
            Rule::name => Expr::Name(atom.as_str().to_string()),
            Rule::paren_expr => match atom.into_inner().next() {
                Some(e) => Expr::Paren(Box::new(build_expr(e)?)),
                None => return Err(err),
            },
            _ => return Err(get_unexpected_error(&atom)),
        },
        None => return Err(err),
    };
    for suffix in inner {
        expr = match suffix.as_rule() {
            Rule::field => {
                let field = suffix
                    .into_inner()
                    .next()
                    .map(|n| n.as_str().to_string())
                    .unwrap_or_default();
                Expr::Field(Box::new(expr), field)
            }
            Rule::call_args => {
                let args = match suffix.into_inner().next() {
                    Some(list) => build_expr_list(list)?,
                    None => vec![],
                };
                Expr::Call(Box::new(expr), args)
            }
            _ => return Err(get_unexpected_error(&suffix)),
        };
    }
    Ok(expr)
}

fn build_func_body(pair: Pair<Rule>, name: Option<String>) -> Result<FunctionBody, Error<Rule>> {
    let mut params = vec![];
    let mut is_vararg = false;
    let mut block = Block::default();
    for p in significant(pair) {
        match p.as_rule() {
            Rule::param_list => {
                for param in p.into_inner() {
                    match param.as_rule() {
                        Rule::name => params.push(param.as_str().to_string()),
                        Rule::vararg => is_vararg = true,
                        _ => return Err(get_unexpected_error(&param)),
                    }
                }
            }
            Rule::block => block = build_block(p)?,
            _ => return Err(get_unexpected_error(&p)),
        }
    }
    Ok(FunctionBody {
        params,
        is_vararg,
        block,
        name,
    })
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
