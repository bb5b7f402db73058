//! The XML tree classes: `XMLTreeParser` and `XMLTreeAnchor` under
//! `MEng.System.Runtime`.
//!
//! Anchors are stable references into the parsed tree, validated by a
//! (parser id, parse id) pair instead of by holding live references: every
//! reparse bumps the parse id, so a stale anchor is refused with
//! `BadAnchor` before any tree access. This keeps traversal pointer-safe
//! across reparses without back-edges in the object graph.
//!
//! The parser is a small non-validating one: elements, attributes,
//! character data, comments, processing instructions, a doctype line, and
//! the five predefined entities plus numeric character references.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::{
    class::{ClassExtent, EnumDef, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::{RunError, RunResult},
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell},
    value::{Payload, Value},
};

pub(crate) const PARSER_CLASS_PATH: &str = "MEng.System.Runtime.XMLTreeParser";
pub(crate) const ANCHOR_CLASS_PATH: &str = "MEng.System.Runtime.XMLTreeAnchor";

/// Error ordinals of `XMLTreeParser.XMLErrs`. Index and attribute misses
/// report through Boolean returns instead of raising, so only the first
/// three ordinals are thrown from this module.
const ERR_PARSE_FAILED: u32 = 0;
const ERR_NO_DOCUMENT: u32 = 1;
const ERR_BAD_ANCHOR: u32 = 2;

/// Process-wide parser-identity source. Ids only need to be unique; all
/// real parser state lives in the value.
static NEXT_PARSER_ID: AtomicU32 = AtomicU32::new(1);

/// One element node in the arena.
#[derive(Debug, Clone)]
struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    /// Indices of element children, in document order.
    children: Vec<u32>,
    /// Concatenated character data directly under this element.
    text: String,
}

/// A parsed document: an arena of nodes with node 0 as the root element.
#[derive(Debug, Clone, Default)]
struct XmlDoc {
    nodes: Vec<XmlNode>,
}

/// The payload of an `XMLTreeParser` value.
#[derive(Debug)]
pub struct XmlParserVal {
    parser_id: u32,
    parse_id: u32,
    doc: Option<XmlDoc>,
}

impl Default for XmlParserVal {
    fn default() -> Self {
        Self {
            parser_id: NEXT_PARSER_ID.fetch_add(1, Ordering::Relaxed),
            parse_id: 0,
            doc: None,
        }
    }
}

/// The payload of an `XMLTreeAnchor` value. A default anchor is invalid
/// until a parser method fills it in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XmlAnchorVal {
    parser_id: u32,
    parse_id: u32,
    node: u32,
}

#[derive(Debug, Default)]
pub struct XmlTreeAnchorClass;

impl RuntimeClass for XmlTreeAnchorClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell(ANCHOR_CLASS_PATH, reg.core.object, ClassExtent::Final);
        reg.register_class(cls)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::XmlAnchor(XmlAnchorVal::default()));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, _engine: &mut MacroEngine, _call: &NativeCall) -> RunResult<NativeResult> {
        Ok(NativeResult::Unhandled)
    }
}

#[derive(Debug, Default)]
pub struct XmlTreeParserClass {
    errs: ClassId,
    parse_string: MethodId,
    parse_buf: MethodId,
    parse_file: MethodId,
    get_root_anchor: MethodId,
    get_child_anchor: MethodId,
    find_child_by_name: MethodId,
    get_child_count: MethodId,
    get_elem_name: MethodId,
    get_attribute: MethodId,
    get_child_text: MethodId,
    path_lookup: MethodId,
}

impl RuntimeClass for XmlTreeParserClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell(PARSER_CLASS_PATH, reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let anchor = reg.find_or_load(ANCHOR_CLASS_PATH)?;
        let string = reg.core.string;
        let boolean = reg.core.boolean;
        let card4 = reg.core.card4;
        let void = reg.core.void;

        self.errs = reg.register_enum(
            "MEng.System.Runtime.XMLTreeParser.XMLErrs",
            EnumDef::from_pairs(&[
                ("ParseFailed", "the document could not be parsed"),
                ("NoDocument", "no document has been parsed"),
                ("BadAnchor", "the anchor does not refer to the current parse"),
                ("BadIndex", "the child index is beyond the element's child count"),
                ("AttrNotFound", "the element has no attribute of that name"),
            ]),
        )?;
        reg.class_mut(id).add_nested_type(self.errs);
        reg.class_mut(id).add_import(anchor);

        let mut m = MethodInfo::new("ParseString", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Content", string);
        self.parse_string = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("ParseBuf", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Buffer", reg.core.mem_buf);
        m.add_in_parm("Count", card4);
        self.parse_buf = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("ParseFile", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Path", string);
        self.parse_file = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("GetRootAnchor", void, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("ToFill", anchor);
        self.get_root_anchor = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("GetChildAnchor", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ParAnchor", anchor);
        m.add_in_parm("ChildIndex", card4);
        m.add_out_parm("ToFill", anchor);
        self.get_child_anchor = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("FindChildByName", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ParAnchor", anchor);
        m.add_in_parm("ToFind", string);
        m.add_in_parm("StartAt", card4);
        m.add_out_parm("ToFill", anchor);
        m.add_out_parm("FoundAt", card4);
        self.find_child_by_name = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("GetChildCount", card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Anchor", anchor);
        self.get_child_count = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("GetElemName", string, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Anchor", anchor);
        self.get_elem_name = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("GetAttribute", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Anchor", anchor);
        m.add_in_parm("AttrName", string);
        m.add_out_parm("Value", string);
        self.get_attribute = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("GetChildText", string, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Anchor", anchor);
        self.get_child_text = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("PathLookup", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Path", string);
        m.add_out_parm("ToFill", anchor);
        self.path_lookup = reg.class_mut(id).add_method(m.const_method())?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::XmlParser(Box::new(XmlParserVal::default())));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.parse_string {
            let content = engine.parm(0)?.as_str()?.as_str().to_owned();
            self.do_parse(engine, &content)?;
        } else if mid == self.parse_buf {
            let count = engine.parm(1)?.as_card4()? as usize;
            let bytes = match &engine.parm(0)?.payload {
                Payload::MemBuf(buf) => buf.bytes().get(..count.min(buf.len())).unwrap_or_default().to_vec(),
                other => return Err(RunError::internal(format!("ParseBuf source is {}", other.kind_name()))),
            };
            let content = match String::from_utf8(bytes) {
                Ok(content) => content,
                Err(err) => {
                    let text = err.to_string();
                    return Err(self.parse_err(engine, &text));
                }
            };
            self.do_parse(engine, &content)?;
        } else if mid == self.parse_file {
            let program_path = engine.parm(0)?.as_str()?.as_str().to_owned();
            let host_path = engine.expand_file_path(&program_path)?;
            let content = match std::fs::read_to_string(&host_path) {
                Ok(content) => content,
                Err(err) => {
                    let text = err.to_string();
                    engine.trace_host_error(PARSER_CLASS_PATH, &text);
                    return Err(self.parse_err(engine, &text));
                }
            };
            self.do_parse(engine, &content)?;
        } else if mid == self.get_root_anchor {
            let anchor = {
                let parser = recv_parser(engine)?;
                if parser.doc.is_none() {
                    None
                } else {
                    Some(XmlAnchorVal {
                        parser_id: parser.parser_id,
                        parse_id: parser.parse_id,
                        node: 0,
                    })
                }
            };
            let Some(anchor) = anchor else {
                return Err(engine.throw(self.errs, ERR_NO_DOCUMENT, ""));
            };
            engine.parm_mut(0)?.payload = Payload::XmlAnchor(anchor);
        } else if mid == self.get_child_anchor {
            let parent = parm_anchor(engine, 0)?;
            let index = engine.parm(1)?.as_card4()?;
            let (parser_id, parse_id, child) = {
                let (doc, parser_id, parse_id) = self.checked_doc(engine, parent)?;
                let node = &doc.nodes[parent.node as usize];
                (parser_id, parse_id, node.children.get(index as usize).copied())
            };
            if let Some(child) = child {
                engine.parm_mut(2)?.payload = Payload::XmlAnchor(XmlAnchorVal {
                    parser_id,
                    parse_id,
                    node: child,
                });
            }
            engine.set_ret(Payload::Bool(child.is_some()))?;
        } else if mid == self.find_child_by_name {
            let parent = parm_anchor(engine, 0)?;
            let name = engine.parm(1)?.as_str()?.as_str().to_owned();
            let start_at = engine.parm(2)?.as_card4()? as usize;
            let found = {
                let (doc, parser_id, parse_id) = self.checked_doc(engine, parent)?;
                let node = &doc.nodes[parent.node as usize];
                node.children
                    .iter()
                    .enumerate()
                    .skip(start_at)
                    .find(|&(_, &child)| doc.nodes[child as usize].name == name)
                    .map(|(at, &child)| (at, child, parser_id, parse_id))
            };
            if let Some((at, child, parser_id, parse_id)) = found {
                engine.parm_mut(3)?.payload = Payload::XmlAnchor(XmlAnchorVal {
                    parser_id,
                    parse_id,
                    node: child,
                });
                engine.parm_mut(4)?.payload = Payload::Card4(at as u32);
            }
            engine.set_ret(Payload::Bool(found.is_some()))?;
        } else if mid == self.get_child_count {
            let anchor = parm_anchor(engine, 0)?;
            let count = {
                let (doc, _, _) = self.checked_doc(engine, anchor)?;
                doc.nodes[anchor.node as usize].children.len() as u32
            };
            engine.set_ret(Payload::Card4(count))?;
        } else if mid == self.get_elem_name {
            let anchor = parm_anchor(engine, 0)?;
            let name = {
                let (doc, _, _) = self.checked_doc(engine, anchor)?;
                doc.nodes[anchor.node as usize].name.clone()
            };
            engine.set_ret(Payload::Str(name.as_str().into()))?;
        } else if mid == self.get_attribute {
            let anchor = parm_anchor(engine, 0)?;
            let attr_name = engine.parm(1)?.as_str()?.as_str().to_owned();
            let value = {
                let (doc, _, _) = self.checked_doc(engine, anchor)?;
                doc.nodes[anchor.node as usize]
                    .attrs
                    .iter()
                    .find(|(name, _)| *name == attr_name)
                    .map(|(_, value)| value.clone())
            };
            if let Some(value) = &value {
                engine.parm_mut(2)?.payload = Payload::Str(value.as_str().into());
            }
            engine.set_ret(Payload::Bool(value.is_some()))?;
        } else if mid == self.get_child_text {
            let anchor = parm_anchor(engine, 0)?;
            let text = {
                let (doc, _, _) = self.checked_doc(engine, anchor)?;
                doc.nodes[anchor.node as usize].text.clone()
            };
            engine.set_ret(Payload::Str(text.as_str().into()))?;
        } else if mid == self.path_lookup {
            // Slash-separated element names rooted at the document element,
            // e.g. "/cfg/node".
            let path = engine.parm(0)?.as_str()?.as_str().to_owned();
            let found = {
                let parser = recv_parser(engine)?;
                parser.doc.as_ref().and_then(|doc| {
                    let mut at = 0_u32;
                    let mut parts = path.split('/').filter(|part| !part.is_empty());
                    let root = parts.next()?;
                    if doc.nodes.first()?.name != root {
                        return None;
                    }
                    for part in parts {
                        at = *doc.nodes[at as usize]
                            .children
                            .iter()
                            .find(|&&child| doc.nodes[child as usize].name == part)?;
                    }
                    Some((at, parser.parser_id, parser.parse_id))
                })
            };
            if let Some((node, parser_id, parse_id)) = found {
                engine.parm_mut(1)?.payload = Payload::XmlAnchor(XmlAnchorVal {
                    parser_id,
                    parse_id,
                    node,
                });
            }
            engine.set_ret(Payload::Bool(found.is_some()))?;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

impl XmlTreeParserClass {
    /// Runs a parse, bumping the parse id whether it succeeds or fails so
    /// anchors into any previous document are invalidated either way.
    fn do_parse(&self, engine: &mut MacroEngine, content: &str) -> RunResult<()> {
        {
            let parser = recv_parser_mut(engine)?;
            parser.parse_id += 1;
            parser.doc = None;
        }
        match parse_document(content) {
            Ok(doc) => {
                recv_parser_mut(engine)?.doc = Some(doc);
                Ok(())
            }
            Err(text) => Err(self.parse_err(engine, &text)),
        }
    }

    fn parse_err(&self, engine: &mut MacroEngine, text: &str) -> RunError {
        engine.throw(self.errs, ERR_PARSE_FAILED, text.to_owned())
    }

    /// Validates an anchor against the receiver parser before any tree
    /// access, raising `BadAnchor` on any mismatch, and hands back the
    /// document with the parser's id pair.
    fn checked_doc<'e>(
        &self,
        engine: &'e mut MacroEngine,
        anchor: XmlAnchorVal,
    ) -> RunResult<(&'e XmlDoc, u32, u32)> {
        let ok = {
            let parser = recv_parser(engine)?;
            parser.parser_id == anchor.parser_id
                && parser.parse_id == anchor.parse_id
                && parser
                    .doc
                    .as_ref()
                    .is_some_and(|doc| (anchor.node as usize) < doc.nodes.len())
        };
        if !ok {
            return Err(engine.throw(self.errs, ERR_BAD_ANCHOR, ""));
        }
        let parser = recv_parser(engine)?;
        let doc = parser
            .doc
            .as_ref()
            .ok_or_else(|| RunError::internal("document vanished after the anchor check"))?;
        Ok((doc, parser.parser_id, parser.parse_id))
    }
}

fn parm_anchor(engine: &MacroEngine, parm: usize) -> RunResult<XmlAnchorVal> {
    match &engine.parm(parm)?.payload {
        Payload::XmlAnchor(anchor) => Ok(*anchor),
        other => Err(RunError::internal(format!("anchor parm is {}", other.kind_name()))),
    }
}

fn recv_parser(engine: &MacroEngine) -> RunResult<&XmlParserVal> {
    match &engine.receiver()?.payload {
        Payload::XmlParser(p) => Ok(p),
        other => Err(RunError::internal(format!("XML parser method on {}", other.kind_name()))),
    }
}

fn recv_parser_mut(engine: &mut MacroEngine) -> RunResult<&mut XmlParserVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::XmlParser(p) => Ok(p),
        other => Err(RunError::internal(format!("XML parser method on {}", other.kind_name()))),
    }
}

// ----- the parser -----

struct Reader<'a> {
    chars: Vec<char>,
    at: usize,
    src: &'a str,
}

impl Reader<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.at).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.at += 1;
        }
        ch
    }

    fn eat(&mut self, want: char) -> bool {
        if self.peek() == Some(want) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, want: &str) -> bool {
        let len = want.chars().count();
        if self.chars[self.at..].starts_with(&want.chars().collect::<Vec<_>>()) {
            self.at += len;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.at += 1;
        }
    }

    fn fail(&self, what: &str) -> String {
        format!("{what} at offset {} of {} characters", self.at, self.src.chars().count())
    }
}

/// Parses one well-formed document into an arena.
fn parse_document(content: &str) -> Result<XmlDoc, String> {
    let mut reader = Reader {
        chars: content.chars().collect(),
        at: 0,
        src: content,
    };
    let mut doc = XmlDoc::default();
    skip_misc(&mut reader)?;
    if reader.peek() != Some('<') {
        return Err(reader.fail("expected a root element"));
    }
    parse_element(&mut reader, &mut doc)?;
    skip_misc(&mut reader)?;
    if reader.peek().is_some() {
        return Err(reader.fail("content after the root element"));
    }
    Ok(doc)
}

/// Skips whitespace, comments, processing instructions, and a doctype.
fn skip_misc(reader: &mut Reader<'_>) -> Result<(), String> {
    loop {
        reader.skip_ws();
        if reader.eat_str("<!--") {
            loop {
                if reader.eat_str("-->") {
                    break;
                }
                if reader.bump().is_none() {
                    return Err(reader.fail("unterminated comment"));
                }
            }
        } else if reader.eat_str("<?") {
            loop {
                if reader.eat_str("?>") {
                    break;
                }
                if reader.bump().is_none() {
                    return Err(reader.fail("unterminated processing instruction"));
                }
            }
        } else if reader.eat_str("<!DOCTYPE") {
            let mut depth = 1;
            while depth > 0 {
                match reader.bump() {
                    Some('<') => depth += 1,
                    Some('>') => depth -= 1,
                    Some(_) => {}
                    None => return Err(reader.fail("unterminated doctype")),
                }
            }
        } else {
            return Ok(());
        }
    }
}

/// Parses one element, appending it and its subtree to the arena. Returns
/// the element's arena index.
fn parse_element(reader: &mut Reader<'_>, doc: &mut XmlDoc) -> Result<u32, String> {
    if !reader.eat('<') {
        return Err(reader.fail("expected '<'"));
    }
    let name = parse_name(reader)?;
    let index = doc.nodes.len() as u32;
    doc.nodes.push(XmlNode {
        name: name.clone(),
        attrs: Vec::new(),
        children: Vec::new(),
        text: String::new(),
    });

    // Attributes.
    loop {
        reader.skip_ws();
        match reader.peek() {
            Some('/' | '>') => break,
            Some(_) => {
                let attr_name = parse_name(reader)?;
                reader.skip_ws();
                if !reader.eat('=') {
                    return Err(reader.fail("expected '=' after attribute name"));
                }
                reader.skip_ws();
                let quote = match reader.bump() {
                    Some(q @ ('"' | '\'')) => q,
                    _ => return Err(reader.fail("expected a quoted attribute value")),
                };
                let mut value = String::new();
                loop {
                    match reader.bump() {
                        Some(ch) if ch == quote => break,
                        Some('&') => value.push_str(&parse_entity(reader)?),
                        Some(ch) => value.push(ch),
                        None => return Err(reader.fail("unterminated attribute value")),
                    }
                }
                doc.nodes[index as usize].attrs.push((attr_name, value));
            }
            None => return Err(reader.fail("unterminated start tag")),
        }
    }

    if reader.eat('/') {
        if !reader.eat('>') {
            return Err(reader.fail("expected '>' after '/'"));
        }
        return Ok(index);
    }
    if !reader.eat('>') {
        return Err(reader.fail("expected '>'"));
    }

    // Content: character data, child elements, comments.
    loop {
        if reader.eat_str("</") {
            let close = parse_name(reader)?;
            if close != name {
                return Err(reader.fail("mismatched end tag"));
            }
            reader.skip_ws();
            if !reader.eat('>') {
                return Err(reader.fail("expected '>' in end tag"));
            }
            return Ok(index);
        }
        if reader.eat_str("<!--") {
            loop {
                if reader.eat_str("-->") {
                    break;
                }
                if reader.bump().is_none() {
                    return Err(reader.fail("unterminated comment"));
                }
            }
            continue;
        }
        match reader.peek() {
            Some('<') => {
                let child = parse_element(reader, doc)?;
                doc.nodes[index as usize].children.push(child);
            }
            Some('&') => {
                reader.bump();
                let text = parse_entity(reader)?;
                doc.nodes[index as usize].text.push_str(&text);
            }
            Some(ch) => {
                reader.bump();
                doc.nodes[index as usize].text.push(ch);
            }
            None => return Err(reader.fail("unterminated element")),
        }
    }
}

fn parse_name(reader: &mut Reader<'_>) -> Result<String, String> {
    let mut name = String::new();
    while let Some(ch) = reader.peek() {
        if ch.is_alphanumeric() || matches!(ch, '_' | '-' | ':' | '.') {
            name.push(ch);
            reader.at += 1;
        } else {
            break;
        }
    }
    if name.is_empty() {
        return Err(reader.fail("expected a name"));
    }
    Ok(name)
}

/// Parses the remainder of an entity reference after the `&`.
fn parse_entity(reader: &mut Reader<'_>) -> Result<String, String> {
    let mut body = String::new();
    loop {
        match reader.bump() {
            Some(';') => break,
            Some(ch) => body.push(ch),
            None => return Err(reader.fail("unterminated entity reference")),
        }
    }
    let resolved = match body.as_str() {
        "lt" => "<".to_owned(),
        "gt" => ">".to_owned(),
        "amp" => "&".to_owned(),
        "apos" => "'".to_owned(),
        "quot" => "\"".to_owned(),
        numeric => {
            let code = if let Some(hex) = numeric.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = numeric.strip_prefix('#') {
                dec.parse().ok()
            } else {
                None
            };
            match code.and_then(char::from_u32) {
                Some(ch) => ch.to_string(),
                None => return Err(reader.fail("unknown entity reference")),
            }
        }
    };
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attributes() {
        let doc = parse_document(
            r#"<?xml version="1.0"?>
            <cfg ver="2">
              <!-- a comment -->
              <node name="first">hello &amp; goodbye</node>
              <node name="second"/>
            </cfg>"#,
        )
        .unwrap();
        let root = &doc.nodes[0];
        assert_eq!(root.name, "cfg");
        assert_eq!(root.attrs, vec![("ver".to_owned(), "2".to_owned())]);
        assert_eq!(root.children.len(), 2);
        let first = &doc.nodes[root.children[0] as usize];
        assert_eq!(first.name, "node");
        assert_eq!(first.text, "hello & goodbye");
        let second = &doc.nodes[root.children[1] as usize];
        assert_eq!(second.attrs[0].1, "second");
    }

    #[test]
    fn rejects_mismatched_tags() {
        assert!(parse_document("<a><b></a></b>").is_err());
        assert!(parse_document("<a>").is_err());
        assert!(parse_document("<a/><b/>").is_err());
    }

    #[test]
    fn numeric_entities_resolve() {
        let doc = parse_document("<a>&#65;&#x42;</a>").unwrap();
        assert_eq!(doc.nodes[0].text, "AB");
    }

    #[test]
    fn reparse_invalidates_prior_parse_ids() {
        let mut parser = XmlParserVal::default();
        parser.parse_id += 1;
        parser.doc = Some(parse_document("<a/>").unwrap());
        let anchor = XmlAnchorVal {
            parser_id: parser.parser_id,
            parse_id: parser.parse_id,
            node: 0,
        };
        // A reparse bumps the parse id; the old anchor no longer matches.
        parser.parse_id += 1;
        assert_ne!(anchor.parse_id, parser.parse_id);
    }
}
