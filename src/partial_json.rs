//! Incremental, lenient JSON reading for streamed tool-call arguments.
//!
//! Arguments arrive as arbitrary fragments of one JSON document:
//!
//! ```text
//! delta 1: {"city":
//! delta 2: "New Yo
//! delta 3: rk","days":[1,
//! delta 4: 2]}
//! ```
//!
//! [`PartialJson`] is a small push parser. Each fragment advances the parser
//! state by exactly its own characters, so the text is scanned once no matter
//! how it is split. Taking a [`PartialJson::snapshot`] builds the best value
//! obtainable from the text seen so far, at a cost proportional to the size of
//! that value:
//!
//! | Text so far                  | Snapshot                        |
//! |------------------------------|---------------------------------|
//! | `{"city":`                   | `{}`                            |
//! | `{"city":"New Yo`            | `{"city":"New Yo"}`             |
//! | `{"city":"New York","days":[1,` | `{"city":"New York","days":[1]}` |
//! | `{"ci`                       | `{}`                            |
//!
//! An unfinished key, or a key without a value yet, is left out. Unfinished
//! strings are included with whatever text they have so far. Unfinished
//! literals (`tru`) are left out.
//!
//! Invalid input never raises: the parser stops advancing and keeps serving the
//! last value it could build. When the final argument string is known,
//! [`ArgumentAccumulator::finalize`] parses it strictly with `serde_json`.

use serde_json::{Map, Number, Value};
use std::collections::HashMap;

/// Nesting depth beyond which the parser gives up, matching serde_json.
const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectExpect {
    KeyOrClose,
    Key,
    Colon,
    Value,
    CommaOrClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayExpect {
    ValueOrClose,
    Value,
    CommaOrClose,
}

#[derive(Debug, Clone)]
enum Container {
    Object {
        map: Map<String, Value>,
        key: Option<String>,
        expect: ObjectExpect,
    },
    Array {
        items: Vec<Value>,
        expect: ArrayExpect,
    },
}

#[derive(Debug, Clone, Default)]
enum Token {
    #[default]
    None,
    /// String body, still escaped as on the wire.
    Str {
        raw: String,
        escaped: bool,
        is_key: bool,
    },
    Num(String),
    Lit(String),
}

#[derive(Debug)]
struct Invalid;

type Step = std::result::Result<(), Invalid>;

/// Push parser over one JSON document
#[derive(Debug, Clone, Default)]
pub struct PartialJson {
    raw: String,
    stack: Vec<Container>,
    token: Token,
    root: Option<Value>,
    poisoned: bool,
}

impl PartialJson {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment.
    pub fn feed(&mut self, fragment: &str) {
        self.raw.push_str(fragment);
        if self.poisoned {
            return;
        }
        for c in fragment.chars() {
            if self.step(c).is_err() {
                log::trace!("partial arguments stopped parsing at {:?}", c);
                self.poisoned = true;
                break;
            }
        }
    }

    /// All text fed so far.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// True once the text stopped being a valid JSON prefix.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// True when a complete top-level value has been read.
    pub fn is_complete(&self) -> bool {
        self.root.is_some() && self.stack.is_empty()
    }

    /// Best value obtainable from the text so far.
    pub fn snapshot(&self) -> Option<Value> {
        if let Some(root) = &self.root {
            return Some(root.clone());
        }

        let mut child = match &self.token {
            Token::Str {
                raw, is_key: false, ..
            } => decode_partial_string(raw).map(Value::String),
            Token::Num(text) => partial_number(text).map(Value::Number),
            Token::Lit(text) => parse_literal(text),
            Token::Str { is_key: true, .. } | Token::None => None,
        };

        for container in self.stack.iter().rev() {
            child = Some(match container {
                Container::Object { map, key, .. } => {
                    let mut map = map.clone();
                    if let (Some(key), Some(value)) = (key, child) {
                        map.insert(key.clone(), value);
                    }
                    Value::Object(map)
                }
                Container::Array { items, .. } => {
                    let mut items = items.clone();
                    items.extend(child);
                    Value::Array(items)
                }
            });
        }
        child
    }

    fn step(&mut self, c: char) -> Step {
        match std::mem::take(&mut self.token) {
            Token::Str {
                mut raw,
                escaped,
                is_key,
            } => {
                if escaped {
                    raw.push(c);
                    self.token = Token::Str {
                        raw,
                        escaped: false,
                        is_key,
                    };
                    return Ok(());
                }
                match c {
                    '"' => {
                        let text = decode_string(&raw).ok_or(Invalid)?;
                        if is_key {
                            self.set_key(text)?;
                        } else {
                            self.complete(Value::String(text))?;
                        }
                    }
                    _ => {
                        raw.push(c);
                        self.token = Token::Str {
                            raw,
                            escaped: c == '\\',
                            is_key,
                        };
                    }
                }
                return Ok(());
            }
            Token::Num(mut text) => {
                if is_number_char(c) {
                    text.push(c);
                    self.token = Token::Num(text);
                    return Ok(());
                }
                let number = parse_number(&text).ok_or(Invalid)?;
                self.complete(Value::Number(number))?;
            }
            Token::Lit(mut text) => {
                if c.is_ascii_alphabetic() {
                    text.push(c);
                    if text.len() > "false".len() {
                        return Err(Invalid);
                    }
                    self.token = Token::Lit(text);
                    return Ok(());
                }
                let value = parse_literal(&text).ok_or(Invalid)?;
                self.complete(value)?;
            }
            Token::None => {}
        }
        self.structural(c)
    }

    fn structural(&mut self, c: char) -> Step {
        match c {
            ' ' | '\t' | '\n' | '\r' => Ok(()),
            '{' => {
                self.open()?;
                self.stack.push(Container::Object {
                    map: Map::new(),
                    key: None,
                    expect: ObjectExpect::KeyOrClose,
                });
                Ok(())
            }
            '[' => {
                self.open()?;
                self.stack.push(Container::Array {
                    items: Vec::new(),
                    expect: ArrayExpect::ValueOrClose,
                });
                Ok(())
            }
            '"' => {
                let is_key = matches!(
                    self.stack.last(),
                    Some(Container::Object {
                        expect: ObjectExpect::KeyOrClose | ObjectExpect::Key,
                        ..
                    })
                );
                if !is_key {
                    self.expect_value()?;
                }
                self.token = Token::Str {
                    raw: String::new(),
                    escaped: false,
                    is_key,
                };
                Ok(())
            }
            '}' => match self.stack.pop() {
                Some(Container::Object {
                    map,
                    expect: ObjectExpect::KeyOrClose | ObjectExpect::CommaOrClose,
                    ..
                }) => self.complete(Value::Object(map)),
                _ => Err(Invalid),
            },
            ']' => match self.stack.pop() {
                Some(Container::Array {
                    items,
                    expect: ArrayExpect::ValueOrClose | ArrayExpect::CommaOrClose,
                }) => self.complete(Value::Array(items)),
                _ => Err(Invalid),
            },
            ',' => match self.stack.last_mut() {
                Some(Container::Object { expect, .. }) if *expect == ObjectExpect::CommaOrClose => {
                    *expect = ObjectExpect::Key;
                    Ok(())
                }
                Some(Container::Array { expect, .. }) if *expect == ArrayExpect::CommaOrClose => {
                    *expect = ArrayExpect::Value;
                    Ok(())
                }
                _ => Err(Invalid),
            },
            ':' => match self.stack.last_mut() {
                Some(Container::Object { expect, .. }) if *expect == ObjectExpect::Colon => {
                    *expect = ObjectExpect::Value;
                    Ok(())
                }
                _ => Err(Invalid),
            },
            '-' | '0'..='9' => {
                self.expect_value()?;
                self.token = Token::Num(c.to_string());
                Ok(())
            }
            't' | 'f' | 'n' => {
                self.expect_value()?;
                self.token = Token::Lit(c.to_string());
                Ok(())
            }
            _ => Err(Invalid),
        }
    }

    fn open(&self) -> Step {
        if self.stack.len() >= MAX_DEPTH {
            return Err(Invalid);
        }
        self.expect_value()
    }

    fn expect_value(&self) -> Step {
        let admits = match self.stack.last() {
            None => self.root.is_none(),
            Some(Container::Object { expect, .. }) => *expect == ObjectExpect::Value,
            Some(Container::Array { expect, .. }) => {
                matches!(expect, ArrayExpect::ValueOrClose | ArrayExpect::Value)
            }
        };
        if admits { Ok(()) } else { Err(Invalid) }
    }

    fn set_key(&mut self, text: String) -> Step {
        match self.stack.last_mut() {
            Some(Container::Object { key, expect, .. })
                if matches!(expect, ObjectExpect::KeyOrClose | ObjectExpect::Key) =>
            {
                *key = Some(text);
                *expect = ObjectExpect::Colon;
                Ok(())
            }
            _ => Err(Invalid),
        }
    }

    fn complete(&mut self, value: Value) -> Step {
        match self.stack.last_mut() {
            None => {
                self.root = Some(value);
                Ok(())
            }
            Some(Container::Object { map, key, expect }) => {
                let key = key.take().ok_or(Invalid)?;
                map.insert(key, value);
                *expect = ObjectExpect::CommaOrClose;
                Ok(())
            }
            Some(Container::Array { items, expect }) => {
                items.push(value);
                *expect = ArrayExpect::CommaOrClose;
                Ok(())
            }
        }
    }
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
}

fn parse_number(text: &str) -> Option<Number> {
    serde_json::from_str(text).ok()
}

fn partial_number(text: &str) -> Option<Number> {
    parse_number(text).or_else(|| parse_number(text.trim_end_matches(['.', 'e', 'E', '+', '-'])))
}

fn parse_literal(text: &str) -> Option<Value> {
    match text {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => None,
    }
}

fn decode_string(raw: &str) -> Option<String> {
    serde_json::from_str(&format!("\"{}\"", raw)).ok()
}

// An unfinished escape (`\`, `\u00`, or half a surrogate pair) is cut off.
fn decode_partial_string(raw: &str) -> Option<String> {
    let mut candidate = raw;
    for _ in 0..3 {
        if let Some(text) = decode_string(candidate) {
            return Some(text);
        }
        candidate = &candidate[..candidate.rfind('\\')?];
    }
    None
}

/// Tracks streamed argument text per tool call.
#[derive(Debug, Default)]
pub struct ArgumentAccumulator {
    calls: HashMap<String, Accumulated>,
}

#[derive(Debug)]
struct Accumulated {
    parser: PartialJson,
    last_good: Value,
}

impl ArgumentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `delta` to the arguments of `item_id`.
    ///
    /// Returns the best-effort parsed value. When nothing better is available
    /// the previous value is returned again, starting from an empty object.
    /// The raw text is available through [`ArgumentAccumulator::raw`].
    pub fn push(&mut self, item_id: &str, delta: &str) -> &Value {
        let entry = self
            .calls
            .entry(item_id.to_string())
            .or_insert_with(|| Accumulated {
                parser: PartialJson::new(),
                last_good: Value::Object(Map::new()),
            });
        entry.parser.feed(delta);
        if !entry.parser.is_poisoned() {
            if let Some(value) = entry.parser.snapshot() {
                entry.last_good = value;
            }
        }
        &entry.last_good
    }

    /// Raw text accumulated for `item_id`.
    pub fn raw(&self, item_id: &str) -> Option<&str> {
        self.calls.get(item_id).map(|a| a.parser.raw())
    }

    /// Strictly parses the authoritative argument string and forgets the call.
    ///
    /// Blank arguments are read as an empty object.
    pub fn finalize(&mut self, item_id: &str, arguments: &str) -> serde_json::Result<Value> {
        self.calls.remove(item_id);
        if arguments.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(arguments)
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}
