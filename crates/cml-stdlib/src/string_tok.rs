//! Whitespace tokenizer and quoted list parsing
//!
//! The tokenizer walks a private copy of its source text. Offsets and
//! error indices count characters, not bytes. The list parsers report the
//! position just past the offending character.

use std::fmt::Write as _;

use cml_engine::collections::{add_vector_type, set_strings, strings};
use cml_engine::value::DbgFormat;
use cml_engine::{
    impl_as_any, ClassBuilder, ClassHandler, ClassInfo, Engine, EngineResult, ErrorEnum, Intrinsic, LiteralValue,
    MacroValue, MethodExt, MethodInfo, MethodTable, ValueId, Visibility,
};

/// Whitespace set of new tokenizers
pub const DEF_WHITESPACE: &str = " \t\r\n";

// ============================================================================
// Parsing
// ============================================================================

/// Append `value` to `accum` as a quoted list entry
///
/// Entries after the first are preceded by `", "`; quotes and backslashes
/// inside the value are escaped with a backslash.
pub fn build_quoted_comma_list(value: &str, accum: &mut String) {
    if !accum.is_empty() {
        accum.push_str(", ");
    }
    accum.push('"');
    for ch in value.chars() {
        match ch {
            '"' => accum.push_str("\\\""),
            '\\' => accum.push_str("\\\\"),
            _ => accum.push(ch),
        }
    }
    accum.push('"');
}

/// Append every value of `values` to `accum` as quoted list entries
pub fn build_quoted_comma_list_all<S: AsRef<str>>(values: &[S], accum: &mut String) {
    for value in values {
        build_quoted_comma_list(value.as_ref(), accum);
    }
}

/// Parse `"a", "b \"quoted\""` style lists
///
/// # Errors
///
/// Returns the error index on malformed input.
pub fn parse_quoted_comma_list(text: &str) -> Result<Vec<String>, u32> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum State {
        StartQ,
        EndQ,
        Comma,
        PostComma,
    }

    let chars: Vec<char> = text.chars().collect();
    let mut values = Vec::new();
    let mut accum = String::new();
    let mut state = State::StartQ;
    let mut index = 0;
    while index < chars.len() {
        let ch = chars[index];
        index += 1;
        match state {
            State::StartQ | State::PostComma => {
                if ch == '"' {
                    accum.clear();
                    state = State::EndQ;
                } else if !ch.is_whitespace() {
                    return Err(index as u32);
                }
            }
            State::EndQ => match ch {
                '"' => {
                    values.push(std::mem::take(&mut accum));
                    state = State::Comma;
                }
                '\\' => match chars.get(index) {
                    Some(&escaped @ ('"' | '\\')) => {
                        accum.push(escaped);
                        index += 1;
                    }
                    _ => return Err(index as u32),
                },
                _ => accum.push(ch),
            },
            State::Comma => {
                if ch == ',' {
                    state = State::PostComma;
                } else if !ch.is_whitespace() {
                    return Err(index as u32);
                }
            }
        }
    }

    match state {
        State::StartQ | State::Comma => Ok(values),
        State::EndQ | State::PostComma => Err(index as u32),
    }
}

/// Parse one CSV line
///
/// Quoted values keep their inner whitespace and commas. Unquoted values run
/// to the next comma. A trailing comma yields a final empty value.
///
/// # Errors
///
/// Returns the error index on an unterminated quote or text after a closing
/// quote.
pub fn parse_csv_line(text: &str) -> Result<Vec<String>, u32> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum State {
        WaitToken,
        WaitCommaTerm,
        WaitTermQ,
        WaitComma,
        PostComma,
    }

    let mut values = Vec::new();
    let mut accum = String::new();
    let mut state = State::WaitToken;
    let mut index = 0u32;
    for ch in text.chars() {
        index += 1;
        match state {
            State::WaitToken | State::PostComma => {
                if ch == '"' {
                    accum.clear();
                    state = State::WaitTermQ;
                } else if ch == ',' {
                    values.push(std::mem::take(&mut accum));
                    state = State::PostComma;
                } else if !ch.is_whitespace() {
                    accum.clear();
                    accum.push(ch);
                    state = State::WaitCommaTerm;
                }
            }
            State::WaitCommaTerm => {
                if ch == ',' {
                    values.push(std::mem::take(&mut accum));
                    state = State::PostComma;
                } else {
                    accum.push(ch);
                }
            }
            State::WaitTermQ => {
                if ch == '"' {
                    values.push(std::mem::take(&mut accum));
                    state = State::WaitComma;
                } else {
                    accum.push(ch);
                }
            }
            State::WaitComma => {
                if ch == ',' {
                    state = State::PostComma;
                } else if !ch.is_whitespace() {
                    return Err(index);
                }
            }
        }
    }

    if state == State::WaitTermQ {
        return Err(index);
    }
    if !accum.is_empty() || state == State::PostComma {
        values.push(accum);
    }
    Ok(values)
}

/// Split a command line into parameters
///
/// Parameters are separated by whitespace; double quotes group text that
/// contains whitespace and are not kept.
///
/// # Errors
///
/// Returns the index of an unterminated opening quote.
pub fn parse_cmd_line(text: &str) -> Result<Vec<String>, u32> {
    let mut parms = Vec::new();
    let mut current = String::new();
    let mut in_parm = false;
    let mut open_quote: Option<usize> = None;

    for (index, ch) in text.chars().enumerate() {
        if open_quote.is_some() {
            if ch == '"' {
                open_quote = None;
            } else {
                current.push(ch);
            }
            continue;
        }
        match ch {
            '"' => {
                open_quote = Some(index);
                in_parm = true;
            }
            _ if ch.is_whitespace() => {
                if in_parm {
                    parms.push(std::mem::take(&mut current));
                    in_parm = false;
                }
            }
            _ => {
                current.push(ch);
                in_parm = true;
            }
        }
    }

    if let Some(index) = open_quote {
        return Err(index as u32);
    }
    if in_parm {
        parms.push(current);
    }
    Ok(parms)
}

// ============================================================================
// Tokenizer value
// ============================================================================

/// Tokenizer state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringTokVal {
    source: Vec<char>,
    whitespace: String,
    offset: usize,
}

impl Default for StringTokVal {
    fn default() -> Self {
        Self::new("", DEF_WHITESPACE)
    }
}

impl StringTokVal {
    /// Tokenizer over `source`, splitting on any character of `whitespace`
    pub fn new(source: &str, whitespace: &str) -> Self {
        let mut tok = Self {
            source: Vec::new(),
            whitespace: String::new(),
            offset: 0,
        };
        tok.set(source, whitespace);
        tok
    }

    /// Replace the source text and whitespace set, then rewind
    pub fn set(&mut self, source: &str, whitespace: &str) {
        self.source = source.chars().collect();
        self.whitespace = whitespace.to_string();
        self.reset();
    }

    /// Replace the whitespace set, keeping the current position
    pub fn set_whitespace(&mut self, whitespace: &str) {
        self.whitespace = whitespace.to_string();
        self.skip_whitespace();
    }

    /// Rewind to the first token
    pub fn reset(&mut self) {
        self.offset = 0;
        self.skip_whitespace();
    }

    /// True while unread text remains
    #[inline]
    pub fn more_tokens(&self) -> bool {
        self.offset < self.source.len()
    }

    /// Read the next token
    pub fn next_token(&mut self) -> Option<String> {
        if !self.more_tokens() {
            return None;
        }
        let len = self.token_len();
        let token = self.source[self.offset..self.offset + len].iter().collect();
        self.offset += len;
        self.skip_whitespace();
        Some(token)
    }

    /// Skip the next token
    pub fn eat_token(&mut self) -> bool {
        if !self.more_tokens() {
            return false;
        }
        self.offset += self.token_len();
        self.skip_whitespace();
        true
    }

    /// Take everything left, moving to the end
    pub fn rest_of_line(&mut self) -> Option<String> {
        let rest = self.peek_rest_of_line()?;
        self.offset = self.source.len();
        Some(rest)
    }

    /// Everything left, without moving
    pub fn peek_rest_of_line(&self) -> Option<String> {
        self.more_tokens()
            .then(|| self.source[self.offset..].iter().collect())
    }

    fn is_whitespace(&self, ch: char) -> bool {
        self.whitespace.contains(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.offset < self.source.len() && self.is_whitespace(self.source[self.offset]) {
            self.offset += 1;
        }
    }

    fn token_len(&self) -> usize {
        self.source[self.offset..]
            .iter()
            .take_while(|ch| !self.is_whitespace(**ch))
            .count()
    }
}

impl Iterator for StringTokVal {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.next_token()
    }
}

impl MacroValue for StringTokVal {
    impl_as_any!();

    fn dbg_format(&self, fmt: DbgFormat) -> String {
        match fmt {
            DbgFormat::Short => format!("[{}/{}]", self.offset, self.source.len()),
            DbgFormat::Long => {
                let mut out = String::new();
                let source: String = self.source.iter().collect();
                let _ = write!(out, "Source = {}\nOffset = {}", source, self.offset);
                out
            }
        }
    }
}

// ============================================================================
// Handler
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokOp {
    BuildQuotedCommaList,
    BuildQuotedCommaList2,
    Ctor,
    EatNextToken,
    FormatQuotedList,
    GetNextToken,
    GetRestOfLine,
    MoreTokens,
    PeekRestOfLine,
    ParseCmdLine,
    ParseCSVLine,
    ParseQuotedCommaList,
    Reset,
    Set,
    SetWhitespace,
    Tokenize,
}

const ERR_BAD_CMD_LINE: u32 = 0;
const ERR_TOKENIZE: u32 = 3;

/// Handler of MEng.System.Runtime.StringTokenizer
#[derive(Debug, Default)]
pub struct StringTokClass {
    table: MethodTable<TokOp>,
    errors: ErrorEnum,
}

impl StringTokClass {
    fn check_whitespace(&self, engine: &Engine, whitespace: &str) -> EngineResult<()> {
        if whitespace.is_empty() {
            return Err(self
                .errors
                .throw_fmt(engine, ERR_TOKENIZE, &[&"The whitespace set cannot be empty"]));
        }
        Ok(())
    }

    fn parse_list(
        &self,
        engine: &mut Engine,
        method: &MethodInfo,
        parse: fn(&str) -> Result<Vec<String>, u32>,
    ) -> EngineResult<()> {
        let first = engine.first_parm_index(method)?;
        let list = engine.stack_value_at(first + 1)?;
        let result = parse(engine.string_at(first)?);
        let ok = match result {
            Ok(values) => {
                set_strings(engine, list, &values)?;
                true
            }
            Err(index) => {
                set_strings::<&str>(engine, list, &[])?;
                engine.set_card4_at(first + 2, index)?;
                false
            }
        };
        engine.set_bool_at(engine.return_index(method)?, ok)
    }
}

impl ClassHandler for StringTokClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        self.errors = class.add_error_enum(
            "StrTokErrors",
            &[
                ("BadCmdLine", "%(1)"),
                ("Build", "%(1)"),
                ("ParseErr", "%(1)"),
                ("TokenizeErr", "%(1)"),
            ],
        )?;
        let list = add_vector_type(class, "ParmStrList", Intrinsic::String.id())?;
        class.add_literal("kDefWhitespace", LiteralValue::String(DEF_WHITESPACE.to_string()));

        let string = Intrinsic::String.id();
        let boolean = Intrinsic::Boolean.id();
        let card4 = Intrinsic::Card4.id();
        let void = Intrinsic::Void.id();
        let methods = [
            (
                MethodInfo::new("BuildQuotedCommaList", void, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("ToAdd", string)
                    .in_out_parm("Accum", string),
                TokOp::BuildQuotedCommaList,
            ),
            (
                MethodInfo::new("BuildQuotedCommaList2", void, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("SrcList", list)
                    .out_parm("Accum", string),
                TokOp::BuildQuotedCommaList2,
            ),
            (MethodInfo::ctor(class.path()), TokOp::Ctor),
            (
                MethodInfo::new("EatNextToken", boolean, Visibility::Public, MethodExt::Final),
                TokOp::EatNextToken,
            ),
            (
                MethodInfo::new("FormatQuotedList", void, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("SrcList", list)
                    .out_parm("ToFill", string),
                TokOp::FormatQuotedList,
            ),
            (
                MethodInfo::new("GetNextToken", boolean, Visibility::Public, MethodExt::Final)
                    .out_parm("ToFill", string),
                TokOp::GetNextToken,
            ),
            (
                MethodInfo::new("GetRestOfLine", boolean, Visibility::Public, MethodExt::Final)
                    .out_parm("ToFill", string),
                TokOp::GetRestOfLine,
            ),
            (
                MethodInfo::new("MoreTokens", boolean, Visibility::Public, MethodExt::Final).with_const(),
                TokOp::MoreTokens,
            ),
            (
                MethodInfo::new("PeekRestOfLine", boolean, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .out_parm("ToFill", string),
                TokOp::PeekRestOfLine,
            ),
            (
                MethodInfo::new("ParseCmdLine", void, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("ToParse", string)
                    .out_parm("ToFill", list),
                TokOp::ParseCmdLine,
            ),
            (
                MethodInfo::new("ParseCSVLine", boolean, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("ToParse", string)
                    .out_parm("ToFill", list)
                    .out_parm("ErrIndex", card4),
                TokOp::ParseCSVLine,
            ),
            (
                MethodInfo::new("ParseQuotedCommaList", boolean, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("ToParse", string)
                    .out_parm("ToFill", list)
                    .out_parm("ErrIndex", card4),
                TokOp::ParseQuotedCommaList,
            ),
            (MethodInfo::new("Reset", void, Visibility::Public, MethodExt::Final), TokOp::Reset),
            (
                MethodInfo::new("Set", void, Visibility::Public, MethodExt::Final)
                    .in_parm("ToIterate", string)
                    .in_parm("Whitespace", string),
                TokOp::Set,
            ),
            (
                MethodInfo::new("SetWhitespace", void, Visibility::Public, MethodExt::Final)
                    .in_parm("Whitespace", string),
                TokOp::SetWhitespace,
            ),
            (
                MethodInfo::new("Tokenize", void, Visibility::Public, MethodExt::Final)
                    .in_parm("ToTokenize", string)
                    .in_parm("Whitespace", string)
                    .out_parm("ToFill", list),
                TokOp::Tokenize,
            ),
        ];
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::<StringTokVal>::default())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        match op {
            TokOp::BuildQuotedCommaList => {
                let value = engine.string_at(first)?.to_string();
                build_quoted_comma_list(&value, engine.string_at_mut(first + 1)?);
            }
            TokOp::Ctor => *engine.value_as_mut::<StringTokVal>(this)? = StringTokVal::default(),
            TokOp::EatNextToken => {
                let eaten = engine.value_as_mut::<StringTokVal>(this)?.eat_token();
                engine.set_bool_at(engine.return_index(method)?, eaten)?;
            }
            TokOp::BuildQuotedCommaList2 | TokOp::FormatQuotedList => {
                let values = strings(engine, engine.stack_value_at(first)?)?;
                let mut out = String::new();
                build_quoted_comma_list_all(&values, &mut out);
                engine.set_string_at(first + 1, out)?;
            }
            TokOp::GetNextToken | TokOp::GetRestOfLine | TokOp::PeekRestOfLine => {
                let tok = engine.value_as_mut::<StringTokVal>(this)?;
                let text = match op {
                    TokOp::GetNextToken => tok.next_token(),
                    TokOp::GetRestOfLine => tok.rest_of_line(),
                    _ => tok.peek_rest_of_line(),
                };
                let found = text.is_some();
                engine.set_string_at(first, text.unwrap_or_default())?;
                engine.set_bool_at(engine.return_index(method)?, found)?;
            }
            TokOp::MoreTokens => {
                let more = engine.value_as::<StringTokVal>(this)?.more_tokens();
                engine.set_bool_at(engine.return_index(method)?, more)?;
            }
            TokOp::ParseCmdLine => {
                let list = engine.stack_value_at(first + 1)?;
                let parsed = parse_cmd_line(engine.string_at(first)?);
                match parsed {
                    Ok(parms) => set_strings(engine, list, &parms)?,
                    Err(index) => {
                        set_strings::<&str>(engine, list, &[])?;
                        let text = format!("Unterminated quote at index {}", index);
                        return Err(self.errors.throw_fmt(engine, ERR_BAD_CMD_LINE, &[&text]));
                    }
                }
            }
            TokOp::ParseCSVLine => self.parse_list(engine, method, parse_csv_line)?,
            TokOp::ParseQuotedCommaList => self.parse_list(engine, method, parse_quoted_comma_list)?,
            TokOp::Reset => engine.value_as_mut::<StringTokVal>(this)?.reset(),
            TokOp::Set => {
                let source = engine.string_at(first)?.to_string();
                let whitespace = engine.string_at(first + 1)?.to_string();
                self.check_whitespace(engine, &whitespace)?;
                engine.value_as_mut::<StringTokVal>(this)?.set(&source, &whitespace);
            }
            TokOp::SetWhitespace => {
                let whitespace = engine.string_at(first)?.to_string();
                self.check_whitespace(engine, &whitespace)?;
                engine.value_as_mut::<StringTokVal>(this)?.set_whitespace(&whitespace);
            }
            TokOp::Tokenize => {
                let source = engine.string_at(first)?.to_string();
                let whitespace = engine.string_at(first + 1)?.to_string();
                self.check_whitespace(engine, &whitespace)?;
                let list = engine.stack_value_at(first + 2)?;
                let tok = engine.value_as_mut::<StringTokVal>(this)?;
                tok.set(&source, &whitespace);
                let tokens: Vec<String> = tok.by_ref().collect();
                set_strings(engine, list, &tokens)?;
            }
        }
        Ok(true)
    }
}
