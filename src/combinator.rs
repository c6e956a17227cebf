//! A small parser-combinator engine over string slices.
//!
//! A [`Parser`] runs against a cursor (`&mut &str`) and yields `Some(match)` after
//! advancing the cursor, or `None` with the cursor left exactly where it was. Every
//! constructor in this module routes through [`Parser::new`], which restores the cursor on
//! failure, so arbitrary compositions backtrack cleanly.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

type ParseFn<A> = dyn Fn(&mut &str) -> Option<A>;

/// A reusable, cheaply clonable parser producing values of type `A`.
pub struct Parser<A> {
    run: Rc<ParseFn<A>>,
}

impl<A> Clone for Parser<A> {
    fn clone(&self) -> Self {
        Parser {
            run: Rc::clone(&self.run),
        }
    }
}

impl<A: 'static> Parser<A> {
    /// Wrap a raw parsing function. The cursor is reset if `f` returns `None`.
    pub fn new(f: impl Fn(&mut &str) -> Option<A> + 'static) -> Self {
        Parser {
            run: Rc::new(move |input: &mut &str| {
                let start = *input;
                let result = f(input);
                if result.is_none() {
                    *input = start;
                }
                result
            }),
        }
    }

    /// Apply the parser at the cursor.
    pub fn parse(&self, input: &mut &str) -> Option<A> {
        (self.run)(input)
    }

    /// Run against a whole source, returning the match and the unconsumed remainder.
    pub fn run<'s>(&self, source: &'s str) -> (Option<A>, &'s str) {
        let mut cursor = source;
        let result = (self.run)(&mut cursor);
        (result, cursor)
    }

    pub fn map<B: 'static>(self, f: impl Fn(A) -> B + 'static) -> Parser<B> {
        Parser::new(move |input| self.parse(input).map(&f))
    }

    /// Reject matches for which `predicate` is false.
    pub fn filter(self, predicate: impl Fn(&A) -> bool + 'static) -> Parser<A> {
        Parser::new(move |input| self.parse(input).filter(|a| predicate(a)))
    }

    /// Sequence with a parser chosen from the first match. Failure of either half
    /// rewinds to the start of the first.
    pub fn flat_map<B: 'static>(self, f: impl Fn(A) -> Parser<B> + 'static) -> Parser<B> {
        Parser::new(move |input| {
            let a = self.parse(input)?;
            f(a).parse(input)
        })
    }

    /// Match `self`, then `next`, keeping the result of `self`.
    pub fn skip<B: 'static>(self, next: Parser<B>) -> Parser<A> {
        zip(self, next).map(|(a, _)| a)
    }

    /// Match `self`, then `next`, keeping the result of `next`.
    pub fn then<B: 'static>(self, next: Parser<B>) -> Parser<B> {
        zip(self, next).map(|(_, b)| b)
    }

    /// Always succeeds; `None` when `self` did not match.
    pub fn optional(self) -> Parser<Option<A>> {
        Parser::new(move |input| Some(self.parse(input)))
    }

    /// Succeed only when `lookahead` does not match right after `self`. The lookahead
    /// consumes nothing.
    pub fn not_followed_by<B: 'static>(self, lookahead: Parser<B>) -> Parser<A> {
        Parser::new(move |input| {
            let a = self.parse(input)?;
            let mut probe = *input;
            match lookahead.parse(&mut probe) {
                Some(_) => None,
                None => Some(a),
            }
        })
    }

    /// Replace the match with the exact text it consumed.
    pub fn recognize(self) -> Parser<String> {
        Parser::new(move |input| {
            let start = *input;
            self.parse(input)?;
            let consumed = start.len() - input.len();
            Some(start[..consumed].to_string())
        })
    }

    /// Zero or more matches separated by `separator`. Never fails; a separator that is
    /// not followed by another match is left unconsumed.
    pub fn zero_or_more<S: 'static>(self, separator: Parser<S>) -> Parser<Vec<A>> {
        Parser::new(move |input| Some(repeat(&self, &separator, input)))
    }

    /// Like [`Parser::zero_or_more`], but at least one match is required.
    pub fn one_or_more<S: 'static>(self, separator: Parser<S>) -> Parser<Vec<A>> {
        Parser::new(move |input| {
            let matches = repeat(&self, &separator, input);
            if matches.is_empty() {
                None
            } else {
                Some(matches)
            }
        })
    }
}

fn repeat<A: 'static, S: 'static>(
    element: &Parser<A>,
    separator: &Parser<S>,
    input: &mut &str,
) -> Vec<A> {
    let mut matches = Vec::new();
    let Some(first) = element.parse(input) else {
        return matches;
    };
    matches.push(first);
    loop {
        let before = *input;
        if separator.parse(input).is_none() {
            break;
        }
        match element.parse(input) {
            // A separator/element pair that consumes nothing would loop forever.
            Some(next) if input.len() < before.len() => matches.push(next),
            _ => {
                *input = before;
                break;
            }
        }
    }
    matches
}

/// Succeeds without consuming input.
pub fn always<A: Clone + 'static>(value: A) -> Parser<A> {
    Parser::new(move |_| Some(value.clone()))
}

/// Matches an exact string.
pub fn literal(expected: &'static str) -> Parser<()> {
    Parser::new(move |input| {
        let rest = input.strip_prefix(expected)?;
        *input = rest;
        Some(())
    })
}

/// Matches a single character satisfying `predicate`.
pub fn char_where(predicate: impl Fn(char) -> bool + 'static) -> Parser<char> {
    Parser::new(move |input| {
        let c = input.chars().next().filter(|c| predicate(*c))?;
        *input = &input[c.len_utf8()..];
        Some(c)
    })
}

/// Matches the longest prefix whose characters satisfy `predicate`, possibly empty.
pub fn prefix_while(predicate: impl Fn(char) -> bool + 'static) -> Parser<String> {
    Parser::new(move |input| {
        let end = input.find(|c: char| !predicate(c)).unwrap_or(input.len());
        let (matched, rest) = input.split_at(end);
        *input = rest;
        Some(matched.to_string())
    })
}

/// Like [`prefix_while`] but requires at least one character.
pub fn prefix_while1(predicate: impl Fn(char) -> bool + 'static) -> Parser<String> {
    prefix_while(predicate).filter(|s| !s.is_empty())
}

/// Matches exactly `length` characters.
pub fn prefix(length: usize) -> Parser<String> {
    Parser::new(move |input| {
        let end = match input.char_indices().nth(length) {
            Some((index, _)) => index,
            None if input.chars().count() == length => input.len(),
            None => return None,
        };
        let (matched, rest) = input.split_at(end);
        *input = rest;
        Some(matched.to_string())
    })
}

/// Ordered choice: the first alternative that matches wins.
pub fn one_of<A: 'static>(alternatives: Vec<Parser<A>>) -> Parser<A> {
    Parser::new(move |input| alternatives.iter().find_map(|p| p.parse(input)))
}

pub fn zip<A: 'static, B: 'static>(a: Parser<A>, b: Parser<B>) -> Parser<(A, B)> {
    Parser::new(move |input| {
        let first = a.parse(input)?;
        let second = b.parse(input)?;
        Some((first, second))
    })
}

pub fn zip3<A: 'static, B: 'static, C: 'static>(
    a: Parser<A>,
    b: Parser<B>,
    c: Parser<C>,
) -> Parser<(A, B, C)> {
    Parser::new(move |input| Some((a.parse(input)?, b.parse(input)?, c.parse(input)?)))
}

pub fn zip4<A: 'static, B: 'static, C: 'static, D: 'static>(
    a: Parser<A>,
    b: Parser<B>,
    c: Parser<C>,
    d: Parser<D>,
) -> Parser<(A, B, C, D)> {
    Parser::new(move |input| {
        Some((
            a.parse(input)?,
            b.parse(input)?,
            c.parse(input)?,
            d.parse(input)?,
        ))
    })
}

/// A placeholder for a rule that is defined after the parsers referring to it.
///
/// The slot holds a weak reference, so recursive grammars do not form `Rc` cycles; whoever
/// builds the grammar keeps the defined parser alive. A reference that is used before
/// [`Forward::define`], or after the definition was dropped, fails to match.
pub struct Forward<A> {
    slot: Rc<RefCell<Weak<ParseFn<A>>>>,
}

impl<A: 'static> Forward<A> {
    pub fn new() -> Self {
        let empty: Weak<ParseFn<A>> = Weak::<fn(&mut &str) -> Option<A>>::new();
        Forward {
            slot: Rc::new(RefCell::new(empty)),
        }
    }

    /// A parser that delegates to whatever gets defined later.
    pub fn parser(&self) -> Parser<A> {
        let slot = Rc::clone(&self.slot);
        Parser::new(move |input| {
            let target = slot.borrow().upgrade()?;
            target(input)
        })
    }

    pub fn define(&self, parser: &Parser<A>) {
        *self.slot.borrow_mut() = Rc::downgrade(&parser.run);
    }
}

impl<A: 'static> Default for Forward<A> {
    fn default() -> Self {
        Self::new()
    }
}
