//! Type tags - unique identifiers for resource types
//!
//! A struct tag names a type by defining address, module, name and its
//! type-argument instantiation. The canonical text form is the display form,
//! e.g. `0x1::coin::Balance<0x1::usd::Usd>`; it round-trips through `FromStr`
//! and is what serde reads and writes.
//!
//! Grammar accepted by the parser:
//!
//! ```text
//! type   := "bool" | "u8" | "u16" | "u32" | "u64" | "u128" | "u256"
//!         | "address" | "signer" | "vector" "<" type ">"
//!         | ADDRESS "::" IDENT "::" IDENT [ "<" type ("," type)* ">" ]
//! ```
//!
//! Vectors and type-argument lists may nest at most [`MAX_TYPE_TAG_DEPTH`]
//! levels deep.

use std::fmt;
use std::str::FromStr;

use crate::address::Address;
use crate::{Error, Result};

/// Deepest nesting of `vector<..>` and type arguments a tag may have
pub const MAX_TYPE_TAG_DEPTH: usize = 128;

/// Runtime type identifier
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeTag {
    Bool,
    U8,
    U16,
    U32,
    U64,
    U128,
    U256,
    Address,
    Signer,
    Vector(Box<TypeTag>),
    Struct(Box<StructTag>),
}

/// Fully qualified struct type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructTag {
    pub address: Address,
    pub module: String,
    pub name: String,
    pub type_args: Vec<TypeTag>,
}

impl StructTag {
    pub fn new(address: Address, module: impl Into<String>, name: impl Into<String>) -> Self {
        StructTag {
            address,
            module: module.into(),
            name: name.into(),
            type_args: Vec::new(),
        }
    }

    pub fn with_type_args(mut self, type_args: Vec<TypeTag>) -> Self {
        self.type_args = type_args;
        self
    }

    /// `<address>::<module>` of the defining module
    pub fn module_id(&self) -> String {
        format!("{}::{}", self.address, self.module)
    }
}

impl TypeTag {
    /// Shorthand for a non-generic struct tag
    pub fn struct_of(address: Address, module: &str, name: &str) -> Self {
        TypeTag::Struct(Box::new(StructTag::new(address, module, name)))
    }

    pub fn as_struct(&self) -> Option<&StructTag> {
        match self {
            TypeTag::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, TypeTag::Struct(_))
    }

    /// Check every identifier inside the tag and the nesting limit
    pub fn is_well_formed(&self) -> bool {
        let mut pending = vec![(self, 0usize)];
        while let Some((tag, depth)) = pending.pop() {
            match tag {
                TypeTag::Vector(inner) => {
                    if depth >= MAX_TYPE_TAG_DEPTH {
                        return false;
                    }
                    pending.push((inner, depth + 1));
                }
                TypeTag::Struct(s) => {
                    if !is_valid_identifier(&s.module) || !is_valid_identifier(&s.name) {
                        return false;
                    }
                    if !s.type_args.is_empty() && depth >= MAX_TYPE_TAG_DEPTH {
                        return false;
                    }
                    pending.extend(s.type_args.iter().map(|arg| (arg, depth + 1)));
                }
                _ => {}
            }
        }
        true
    }
}

/// Identifier rule: `[A-Za-z_][A-Za-z0-9_]*`, but not a lone `_`
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        Some('_') if s.len() > 1 => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::U8 => write!(f, "u8"),
            TypeTag::U16 => write!(f, "u16"),
            TypeTag::U32 => write!(f, "u32"),
            TypeTag::U64 => write!(f, "u64"),
            TypeTag::U128 => write!(f, "u128"),
            TypeTag::U256 => write!(f, "u256"),
            TypeTag::Address => write!(f, "address"),
            TypeTag::Signer => write!(f, "signer"),
            TypeTag::Vector(inner) => write!(f, "vector<{}>", inner),
            TypeTag::Struct(s) => write!(f, "{}", s),
        }
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self)
    }
}

impl fmt::Display for StructTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.address, self.module, self.name)?;
        if !self.type_args.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.type_args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

impl FromStr for TypeTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let tokens = tokenize(s)?;
        let mut parser = Parser {
            input: s,
            tokens,
            position: 0,
            depth: 0,
        };
        let tag = parser.parse_type()?;
        parser.expect_end()?;
        Ok(tag)
    }
}

impl TryFrom<String> for TypeTag {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.to_string()
    }
}

// ── Tokenizer ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    ColonColon,
    LAngle,
    RAngle,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '<' => {
                tokens.push(Token::LAngle);
                i += 1;
            }
            '>' => {
                tokens.push(Token::RAngle);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                tokens.push(Token::ColonColon);
                i += 2;
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::Parse(format!(
                    "unexpected character '{}' at offset {} in type tag '{}'",
                    other, i, input
                )))
            }
        }
    }

    Ok(tokens)
}

// ── Parser ────────────────────────────────────────────────

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> Error {
        Error::Parse(format!("{} in type tag '{}'", what, self.input))
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(self.error(&format!("expected {:?}, found {:?}", expected, t))),
            None => Err(self.error(&format!("expected {:?}, found end of input", expected))),
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(self.error(&format!("trailing {:?}", t))),
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Name(name)) if is_valid_identifier(&name) => Ok(name),
            Some(Token::Name(name)) => Err(self.error(&format!("invalid identifier '{}'", name))),
            Some(t) => Err(self.error(&format!("expected identifier, found {:?}", t))),
            None => Err(self.error("expected identifier, found end of input")),
        }
    }

    /// Run `f` one nesting level deeper
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_TYPE_TAG_DEPTH {
            return Err(Error::Parse(format!(
                "type tag nesting exceeds {} levels",
                MAX_TYPE_TAG_DEPTH
            )));
        }
        self.depth += 1;
        let parsed = f(self);
        self.depth -= 1;
        parsed
    }

    fn parse_type(&mut self) -> Result<TypeTag> {
        let name = match self.next() {
            Some(Token::Name(name)) => name,
            Some(t) => return Err(self.error(&format!("expected type, found {:?}", t))),
            None => return Err(self.error("empty type")),
        };

        let tag = match name.as_str() {
            "bool" => TypeTag::Bool,
            "u8" => TypeTag::U8,
            "u16" => TypeTag::U16,
            "u32" => TypeTag::U32,
            "u64" => TypeTag::U64,
            "u128" => TypeTag::U128,
            "u256" => TypeTag::U256,
            "address" => TypeTag::Address,
            "signer" => TypeTag::Signer,
            "vector" => {
                self.expect(Token::LAngle)?;
                let inner = self.nested(Self::parse_type)?;
                self.expect(Token::RAngle)?;
                TypeTag::Vector(Box::new(inner))
            }
            _ if name.starts_with(|c: char| c.is_ascii_digit()) => {
                let address = Address::from_hex(&name)?;
                self.expect(Token::ColonColon)?;
                let module = self.expect_identifier()?;
                self.expect(Token::ColonColon)?;
                let struct_name = self.expect_identifier()?;
                let type_args = if self.peek() == Some(&Token::LAngle) {
                    self.nested(Self::parse_type_args)?
                } else {
                    Vec::new()
                };
                TypeTag::Struct(Box::new(StructTag {
                    address,
                    module,
                    name: struct_name,
                    type_args,
                }))
            }
            other => return Err(self.error(&format!("unknown type '{}'", other))),
        };

        Ok(tag)
    }

    fn parse_type_args(&mut self) -> Result<Vec<TypeTag>> {
        self.expect(Token::LAngle)?;
        let mut args = vec![self.parse_type()?];
        loop {
            match self.next() {
                Some(Token::Comma) => args.push(self.parse_type()?),
                Some(Token::RAngle) => break,
                Some(t) => return Err(self.error(&format!("expected ',' or '>', found {:?}", t))),
                None => return Err(self.error("unterminated type argument list")),
            }
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_struct() {
        let tag: TypeTag = "0x1::counter::Counter".parse().unwrap();
        assert_eq!(tag, TypeTag::struct_of(Address::ONE, "counter", "Counter"));
        assert_eq!(tag.to_string(), "0x1::counter::Counter");
    }

    #[test]
    fn test_parse_generic_struct() {
        let tag: TypeTag = "0x1::coin::Balance<0xcafe::usd::Usd, vector<u8>>"
            .parse()
            .unwrap();
        let expected = TypeTag::Struct(Box::new(
            StructTag::new(Address::ONE, "coin", "Balance").with_type_args(vec![
                TypeTag::struct_of(Address::from_u64(0xcafe), "usd", "Usd"),
                TypeTag::Vector(Box::new(TypeTag::U8)),
            ]),
        ));
        assert_eq!(tag, expected);
        assert_eq!(
            tag.to_string(),
            "0x1::coin::Balance<0xcafe::usd::Usd, vector<u8>>"
        );
    }

    #[test]
    fn test_parse_normalizes_address_and_whitespace() {
        let tag: TypeTag = " 0x0001 :: m :: S < u64 > ".parse().unwrap();
        assert_eq!(tag.to_string(), "0x1::m::S<u64>");
    }

    #[test]
    fn test_parse_primitives() {
        for text in ["bool", "u8", "u16", "u32", "u64", "u128", "u256", "address", "signer"] {
            let tag: TypeTag = text.parse().unwrap();
            assert_eq!(tag.to_string(), text);
            assert!(!tag.is_struct());
        }
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            "0x1::counter",
            "0x1::counter::",
            "0x1::9bad::Counter",
            "0x1::m::S<u64",
            "0x1::m::S<>",
            "vector<u8",
            "u64 u64",
            "Counter",
            "0x1::m::S#",
        ] {
            assert!(
                matches!(bad.parse::<TypeTag>(), Err(Error::Parse(_))),
                "'{}' should not parse",
                bad
            );
        }
    }

    #[test]
    fn test_nesting_limit() {
        let nest = |depth: usize| format!("{}u8{}", "vector<".repeat(depth), ">".repeat(depth));

        let deepest: TypeTag = nest(MAX_TYPE_TAG_DEPTH).parse().unwrap();
        assert!(deepest.is_well_formed());

        let err = nest(MAX_TYPE_TAG_DEPTH + 1).parse::<TypeTag>().unwrap_err();
        assert_eq!(
            err,
            Error::Parse(format!("type tag nesting exceeds {} levels", MAX_TYPE_TAG_DEPTH))
        );

        // Far past the limit must still be an error, not a crash
        assert!(nest(200_000).parse::<TypeTag>().is_err());
        let generic = format!("{}u8{}", "0x1::m::S<".repeat(200_000), ">".repeat(200_000));
        assert!(generic.parse::<TypeTag>().is_err());
        assert!(serde_json::from_value::<TypeTag>(serde_json::Value::String(nest(200_000))).is_err());
    }

    #[test]
    fn test_well_formed_rejects_deep_tags_built_in_code() {
        let mut tag = TypeTag::U8;
        for _ in 0..=MAX_TYPE_TAG_DEPTH {
            tag = TypeTag::Vector(Box::new(tag));
        }
        assert!(!tag.is_well_formed());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_valid_identifier("Counter"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("a1_b2"));
        assert!(!is_valid_identifier("_"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("has-dash"));
    }

    #[test]
    fn test_well_formed_checks_nested_names() {
        let bad = TypeTag::Vector(Box::new(TypeTag::struct_of(Address::ONE, "m", "bad name")));
        assert!(!bad.is_well_formed());
        assert!(TypeTag::struct_of(Address::ONE, "m", "Good").is_well_formed());
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let tag: TypeTag = "0x1::coin::Balance<u64>".parse().unwrap();
        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(json, "\"0x1::coin::Balance<u64>\"");
        let back: TypeTag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag);
        assert!(serde_json::from_str::<TypeTag>("\"not a type\"").is_err());
    }

    #[test]
    fn test_ordering_is_total_and_deterministic() {
        let mut tags: Vec<TypeTag> = ["0x2::a::A", "0x1::b::B", "0x1::a::A", "u8"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        tags.sort();
        let again = {
            let mut t = tags.clone();
            t.reverse();
            t.sort();
            t
        };
        assert_eq!(tags, again);
    }
}
