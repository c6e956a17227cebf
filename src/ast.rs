//! Evaluable expression tree, built from the grammar's parse elements.

use std::fmt;

use crate::parser::{Element, Sexp, SexpCall, Target};

/// A name, used both as a call target and as a free variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Symbol(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol(name.to_string())
    }
}

impl From<String> for Symbol {
    fn from(name: String) -> Self {
        Symbol(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub target: Box<Expression>,
    pub params: Vec<Expression>,
}

impl Call {
    /// The target followed by the parameters. Binding lists such as `(a 1 b 2)` are
    /// parsed as calls and read back this way.
    pub fn all_expressions(&self) -> Vec<Expression> {
        let mut all = Vec::with_capacity(self.params.len() + 1);
        all.push((*self.target).clone());
        all.extend(self.params.iter().cloned());
        all
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionMember {
    pub name: String,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionValue {
    String(String),
    /// Numeral text; integer or double is decided at evaluation
    Number(String),
    Array(Vec<Expression>),
    Object(Vec<ExpressionMember>),
    Boolean(bool),
    Null,
    /// Parenthesized sub-expression
    Expression(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Call(Call),
    Symbol(Symbol),
    Value(ExpressionValue),
}

impl Expression {
    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            Expression::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self, Expression::Value(ExpressionValue::Null))
    }
}

impl From<Element> for Expression {
    fn from(element: Element) -> Self {
        match element {
            Element::String(s) => Expression::Value(ExpressionValue::String(s)),
            Element::Number(n) => Expression::Value(ExpressionValue::Number(n)),
            Element::Boolean(b) => Expression::Value(ExpressionValue::Boolean(b)),
            Element::Null => Expression::Value(ExpressionValue::Null),
            Element::Array(elements) => Expression::Value(ExpressionValue::Array(
                elements.into_iter().map(Expression::from).collect(),
            )),
            Element::Object(members) => Expression::Value(ExpressionValue::Object(
                members
                    .into_iter()
                    .map(|m| ExpressionMember {
                        name: m.name,
                        value: Expression::from(m.value),
                    })
                    .collect(),
            )),
            Element::Symbol(name) => Expression::Symbol(Symbol(name)),
            Element::Sexp(sexp) => Expression::from(sexp),
        }
    }
}

impl From<Sexp> for Expression {
    fn from(sexp: Sexp) -> Self {
        match sexp {
            Sexp::Empty => Expression::Value(ExpressionValue::Null),
            Sexp::Call(SexpCall { target, params }) => {
                let target = match target {
                    Target::Symbol(name) => Expression::Symbol(Symbol(name)),
                    Target::Sexp(inner) => Expression::from(*inner),
                };
                Expression::Call(Call {
                    target: Box::new(target),
                    params: params.into_iter().map(Expression::from).collect(),
                })
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Symbol(s) => write!(f, "{}", s),
            Expression::Call(call) => {
                write!(f, "({}", call.target)?;
                for param in &call.params {
                    write!(f, " {}", param)?;
                }
                write!(f, ")")
            }
            Expression::Value(value) => match value {
                ExpressionValue::String(s) => write!(f, "\"{}\"", s),
                ExpressionValue::Number(n) => write!(f, "{}", n),
                ExpressionValue::Boolean(b) => write!(f, "{}", b),
                ExpressionValue::Null => write!(f, "null"),
                ExpressionValue::Expression(e) => write!(f, "{}", e),
                ExpressionValue::Array(elements) => {
                    write!(f, "[")?;
                    for (i, elem) in elements.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", elem)?;
                    }
                    write!(f, "]")
                }
                ExpressionValue::Object(members) => {
                    write!(f, "{{")?;
                    for (i, member) in members.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "\"{}\": {}", member.name, member.value)?;
                    }
                    write!(f, "}}")
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_element;

    fn translate(source: &str) -> Expression {
        Expression::from(parse_element(source).unwrap())
    }

    fn number(text: &str) -> Expression {
        Expression::Value(ExpressionValue::Number(text.to_string()))
    }

    #[test]
    fn test_literals() {
        assert_eq!(translate("12.5"), number("12.5"));
        assert_eq!(
            translate("\"hi\""),
            Expression::Value(ExpressionValue::String("hi".to_string()))
        );
        assert_eq!(translate("null"), Expression::Value(ExpressionValue::Null));
        assert_eq!(
            translate("[true, x]"),
            Expression::Value(ExpressionValue::Array(vec![
                Expression::Value(ExpressionValue::Boolean(true)),
                Expression::Symbol(Symbol::from("x")),
            ]))
        );
    }

    #[test]
    fn test_empty_sexp_is_null() {
        assert_eq!(translate("()"), Expression::Value(ExpressionValue::Null));
        assert_eq!(
            translate("[(), ( )]"),
            Expression::Value(ExpressionValue::Array(vec![
                Expression::Value(ExpressionValue::Null),
                Expression::Value(ExpressionValue::Null),
            ]))
        );
    }

    #[test]
    fn test_calls() {
        assert_eq!(
            translate("(+ a 1)"),
            Expression::Call(Call {
                target: Box::new(Expression::Symbol(Symbol::from("+"))),
                params: vec![Expression::Symbol(Symbol::from("a")), number("1")],
            })
        );

        let Expression::Call(outer) = translate("((fn [a] a) 2)") else {
            panic!("expected a call");
        };
        assert!(matches!(*outer.target, Expression::Call(_)));
        assert_eq!(outer.params, vec![number("2")]);
    }

    #[test]
    fn test_object_order_preserved() {
        let Expression::Value(ExpressionValue::Object(members)) = translate(r#"{"z": 1, "a": 2}"#)
        else {
            panic!("expected an object");
        };
        let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn test_all_expressions() {
        let Expression::Call(call) = translate("(a 1 b 2)") else {
            panic!("expected a call");
        };
        let all = call.all_expressions();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].symbol(), Some(&Symbol::from("a")));
        assert_eq!(all[2].symbol(), Some(&Symbol::from("b")));
    }

    #[test]
    fn test_display() {
        assert_eq!(translate("(f [1, \"a\"] {\"k\": x})").to_string(), "(f [1, \"a\"] {\"k\": x})");
    }
}
