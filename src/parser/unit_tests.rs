use super::api::{parse_chunk, Rule, SnippetParser};
use super::ast::*;
use pest::fails_with;
use pest::parses_to;
use pest::consumes_to;
use pest::Parser;

#[test]
fn test_integer_number() {
    parses_to! {
        parser: SnippetParser,
        input: "10",
        rule: Rule::number,
        tokens: [
            number(0, 2)
        ]
    };
}

#[test]
fn test_decimal_number() {
    parses_to! {
        parser: SnippetParser,
        input: "10.5",
        rule: Rule::number,
        tokens: [
            number(0, 4)
        ]
    };
}

#[test]
fn test_number_rejects_letters() {
    fails_with! {
        parser: SnippetParser,
        input: "abc",
        rule: Rule::number,
        positives: vec![Rule::number],
        negatives: vec![],
        pos: 0
    };
}

#[test]
fn test_double_quoted_string() {
    parses_to! {
        parser: SnippetParser,
        input: "\"hi\"",
        rule: Rule::string,
        tokens: [
            string(0, 4, [
                dq_chars(1, 3)
            ])
        ]
    };
}

#[test]
fn test_local_statement_tokens() {
    parses_to! {
        parser: SnippetParser,
        input: "local x = 1",
        rule: Rule::local_stat,
        tokens: [
            local_stat(0, 11, [
                kw_local(0, 5),
                name(6, 7),
                expr(10, 11, [
                    concat_expr(10, 11, [
                        unary_expr(10, 11, [
                            number(10, 11)
                        ])
                    ])
                ])
            ])
        ]
    };
}

#[test]
fn test_call_statement_tokens() {
    parses_to! {
        parser: SnippetParser,
        input: "print(\"a\")",
        rule: Rule::call_stat,
        tokens: [
            call_stat(0, 10, [
                suffixed(0, 10, [
                    name(0, 5),
                    call_args(5, 10, [
                        expr_list(6, 9, [
                            expr(6, 9, [
                                concat_expr(6, 9, [
                                    unary_expr(6, 9, [
                                        string(6, 9, [
                                            dq_chars(7, 8)
                                        ])
                                    ])
                                ])
                            ])
                        ])
                    ])
                ])
            ])
        ]
    };
}

#[test]
fn test_keywords_are_not_names() {
    assert!(SnippetParser::parse(Rule::name, "local").is_err());
    assert!(SnippetParser::parse(Rule::name, "end").is_err());
    assert!(SnippetParser::parse(Rule::name, "endpoint").is_ok());
}

#[test]
fn test_names_starting_with_keywords() {
    let chunk = parse_chunk("localx = 1 return notify").unwrap();
    assert_eq!(
        chunk.block.stats,
        vec![Stat::Assign {
            name: "localx".to_string(),
            value: Expr::Number(1.0),
        }]
    );
    assert_eq!(chunk.block.ret, Some(vec![Expr::Name("notify".to_string())]));
}

#[test]
fn test_not_binds_to_operand() {
    let chunk = parse_chunk("return not x").unwrap();
    assert_eq!(
        chunk.block.ret,
        Some(vec![Expr::Not(Box::new(Expr::Name("x".to_string())))])
    );
}

#[test]
fn test_concat_is_right_associative() {
    let chunk = parse_chunk("return 'a' .. 'b' .. 'c'").unwrap();
    let expected = Expr::Concat(
        Box::new(Expr::Str("a".to_string())),
        Box::new(Expr::Concat(
            Box::new(Expr::Str("b".to_string())),
            Box::new(Expr::Str("c".to_string())),
        )),
    );
    assert_eq!(chunk.block.ret, Some(vec![expected]));
}

#[test]
fn test_vararg_forwarding_call() {
    let chunk = parse_chunk("return wrapped_func(...)").unwrap();
    assert_eq!(
        chunk.block.ret,
        Some(vec![Expr::Call(
            Box::new(Expr::Name("wrapped_func".to_string())),
            vec![Expr::Vararg]
        )])
    );
}

#[test]
fn test_function_statement_and_params() {
    let chunk = parse_chunk("function f(a, b, ...) return a end").unwrap();
    match &chunk.block.stats[0] {
        Stat::Function { name, body } => {
            assert_eq!(name, "f");
            assert_eq!(body.params, vec!["a".to_string(), "b".to_string()]);
            assert!(body.is_vararg);
            assert_eq!(body.name.as_deref(), Some("f"));
        }
        other => panic!("unexpected statement {:?}", other),
    }
}

#[test]
fn test_if_else() {
    let chunk = parse_chunk("if x == 1 then print('one') else print('other') end").unwrap();
    match &chunk.block.stats[0] {
        Stat::If {
            cond, else_block, ..
        } => {
            assert!(matches!(cond, Expr::Equal(..)));
            assert!(else_block.is_some());
        }
        other => panic!("unexpected statement {:?}", other),
    }
}

#[test]
fn test_field_access_chain() {
    let chunk = parse_chunk("debug.getupvalues(f)").unwrap();
    match &chunk.block.stats[0] {
        Stat::Call(Expr::Call(callee, args)) => {
            assert_eq!(
                **callee,
                Expr::Field(
                    Box::new(Expr::Name("debug".to_string())),
                    "getupvalues".to_string()
                )
            );
            assert_eq!(args.len(), 1);
        }
        other => panic!("unexpected statement {:?}", other),
    }
}

#[test]
fn test_expression_statement_must_be_a_call() {
    assert!(parse_chunk("x").is_err());
    assert!(parse_chunk("debug.traceback").is_err());
}

#[test]
fn test_comments_and_escapes() {
    let chunk = parse_chunk("-- leading comment\nreturn \"a\\tb\"").unwrap();
    assert_eq!(chunk.block.ret, Some(vec![Expr::Str("a\tb".to_string())]));
}
