//! Grammar for JSON values extended with S-expression calls and line comments.

use std::cell::Cell;
use std::rc::Rc;

use crate::{MAX_NESTING_DEPTH, ParseError};
use crate::combinator::{
    Forward, Parser, always, char_where, literal, one_of, prefix, prefix_while, prefix_while1,
    zip, zip3, zip4,
};

/// A named member of an object literal, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub value: Element,
}

/// Raw syntax tree produced by the grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// String contents between the quotes; escape sequences are kept verbatim
    String(String),
    /// Numeral text exactly as written
    Number(String),
    Boolean(bool),
    Null,
    Array(Vec<Element>),
    Object(Vec<Member>),
    /// A bare identifier, only valid inside arrays, objects and sexps
    Symbol(String),
    Sexp(Sexp),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sexp {
    /// `()`
    Empty,
    Call(SexpCall),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SexpCall {
    pub target: Target,
    /// Nested values or bare symbols (`Element::Symbol`)
    pub params: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Symbol(String),
    Sexp(Box<Sexp>),
}

const SPECIAL_CHARS: &str = "*/#@$!%&?_<>=";

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\n' | '\r' | '\t')
}

fn is_symbol_start(c: char) -> bool {
    c.is_alphabetic() || SPECIAL_CHARS.contains(c)
}

fn is_symbol_char(c: char) -> bool {
    is_symbol_start(c) || c.is_alphanumeric() || c == '+' || c == '-'
}

/// Whitespace and `#` line comments, in any mix, possibly none.
pub fn whitespace_or_comment() -> Parser<()> {
    let whitespace = prefix_while1(is_whitespace).map(|_| ());
    let comment = literal("#").then(prefix_while(|c| c != '\n')).map(|_| ());
    one_of(vec![whitespace, comment])
        .zero_or_more(always(()))
        .map(|_| ())
}

/// `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`, returned verbatim.
pub fn number() -> Parser<String> {
    let digits = || prefix_while1(|c| c.is_ascii_digit());
    let integer = one_of(vec![
        literal("0").recognize(),
        zip(char_where(|c| matches!(c, '1'..='9')), prefix_while(|c| c.is_ascii_digit())).recognize(),
    ]);
    let fraction = zip(literal("."), digits());
    let exponent = zip3(
        char_where(|c| c == 'e' || c == 'E'),
        char_where(|c| c == '+' || c == '-').optional(),
        digits(),
    );
    zip4(
        literal("-").optional(),
        integer,
        fraction.optional(),
        exponent.optional(),
    )
    .recognize()
}

/// A double-quoted string; returns the raw text between the quotes.
pub fn quoted() -> Parser<String> {
    let escaped = zip(literal("\\"), prefix(1)).recognize();
    let unescaped = prefix_while1(|c| c != '"' && c != '\\');
    let content = one_of(vec![escaped, unescaped])
        .zero_or_more(always(()))
        .map(|parts| parts.concat());
    zip3(literal("\""), content, literal("\"")).map(|(_, s, _)| s)
}

pub fn symbol() -> Parser<String> {
    let named = zip(char_where(is_symbol_start), prefix_while(is_symbol_char)).recognize();
    let operator = char_where(|c| c == '+' || c == '-')
        .not_followed_by(char_where(is_symbol_char))
        .recognize();
    one_of(vec![named, operator])
}

fn keyword(word: &'static str, element: Element) -> Parser<Element> {
    literal(word)
        .not_followed_by(char_where(is_symbol_char))
        .map(move |_| element.clone())
}

/// Bracket depth of the parse in progress. `exceeded` latches once a bracket past the
/// limit was opened, so the failure can be told apart from malformed input.
struct Nesting {
    depth: Cell<usize>,
    exceeded: Cell<bool>,
    limit: usize,
}

impl Nesting {
    fn reset(&self) {
        self.depth.set(0);
        self.exceeded.set(false);
    }
}

/// Run `inner` one bracket level deeper, failing once the limit is reached.
fn nested<A: 'static>(nesting: &Rc<Nesting>, inner: Parser<A>) -> Parser<A> {
    let nesting = Rc::clone(nesting);
    Parser::new(move |input| {
        let depth = nesting.depth.get();
        if depth >= nesting.limit {
            nesting.exceeded.set(true);
            return None;
        }
        nesting.depth.set(depth + 1);
        let result = inner.parse(input);
        nesting.depth.set(depth);
        result
    })
}

/// The assembled grammar. Recursive references are weak, so `document` is what keeps
/// every rule alive.
struct Grammar {
    document: Parser<Element>,
    nesting: Rc<Nesting>,
}

impl Grammar {
    fn new(max_nesting: usize) -> Self {
        let ws = whitespace_or_comment;
        let nesting = Rc::new(Nesting {
            depth: Cell::new(0),
            exceeded: Cell::new(false),
            limit: max_nesting,
        });
        let forward_value: Forward<Element> = Forward::new();
        let forward_sexp: Forward<Sexp> = Forward::new();

        // An array/object slot admits bare symbols as well as values.
        let element = zip3(
            ws(),
            one_of(vec![forward_value.parser(), symbol().map(Element::Symbol)]),
            ws(),
        )
        .map(|(_, e, _)| e);

        let array = zip4(
            literal("["),
            nested(&nesting, element.clone().zero_or_more(literal(","))),
            ws(),
            literal("]"),
        )
        .map(|(_, elements, _, _)| Element::Array(elements));

        let member = zip3(
            zip3(ws(), quoted(), ws()).map(|(_, name, _)| name),
            literal(":"),
            element,
        )
        .map(|(name, _, value)| Member { name, value });
        let object = zip4(
            literal("{"),
            nested(&nesting, member.zero_or_more(literal(","))),
            ws(),
            literal("}"),
        )
        .map(|(_, members, _, _)| Element::Object(members));

        let target = one_of(vec![
            symbol().map(Target::Symbol),
            forward_sexp.parser().map(|s| Target::Sexp(Box::new(s))),
        ]);
        let param = one_of(vec![forward_value.parser(), symbol().map(Element::Symbol)]);
        let params = ws().then(param).zero_or_more(always(()));
        let call = zip(target, params).map(|(target, params)| Sexp::Call(SexpCall { target, params }));
        let sexp = zip4(
            literal("(").skip(ws()),
            nested(&nesting, one_of(vec![call, always(Sexp::Empty)])),
            ws(),
            literal(")"),
        )
        .map(|(_, sexp, _, _)| sexp);
        forward_sexp.define(&sexp);

        let value = one_of(vec![
            quoted().map(Element::String),
            number().map(Element::Number),
            object,
            array,
            keyword("true", Element::Boolean(true)),
            keyword("false", Element::Boolean(false)),
            keyword("null", Element::Null),
            sexp.map(Element::Sexp),
        ]);
        forward_value.define(&value);

        let document = zip3(ws(), value, ws()).map(|(_, v, _)| v);
        Grammar { document, nesting }
    }

    fn parse(&self, source: &str) -> Result<Element, ParseError> {
        self.nesting.reset();
        let (result, rest) = self.document.run(source);
        if self.nesting.exceeded.get() {
            return Err(ParseError::NestingTooDeep(self.nesting.limit));
        }
        match (result, rest) {
            (Some(element), "") => Ok(element),
            (Some(_), rest) => Err(ParseError::UnparsedInput(rest.to_string())),
            (None, _) => Err(ParseError::ParseFailure),
        }
    }
}

thread_local! {
    static GRAMMAR: Grammar = Grammar::new(MAX_NESTING_DEPTH);
}

/// Parse a complete document: one value surrounded by optional whitespace and comments.
///
/// Brackets nested deeper than [`MAX_NESTING_DEPTH`] fail with
/// [`ParseError::NestingTooDeep`] before the parser can exhaust the stack.
pub fn parse_element(source: &str) -> Result<Element, ParseError> {
    GRAMMAR.with(|grammar| grammar.parse(source))
}
