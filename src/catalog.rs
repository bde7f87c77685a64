use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::Naming;

/// Statements known to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statement {
    CreateSchema,
    DropSchema,
    CreateIndex,
    GetCompany,
    MergeJson,
    AppendPartners,
    MetaSave,
    MetaRead,
}

impl Statement {
    pub const ALL: [Statement; 8] = [
        Statement::CreateSchema,
        Statement::DropSchema,
        Statement::CreateIndex,
        Statement::GetCompany,
        Statement::MergeJson,
        Statement::AppendPartners,
        Statement::MetaSave,
        Statement::MetaRead,
    ];

    /// Template file name
    pub fn name(self) -> &'static str {
        match self {
            Statement::CreateSchema => "create.sql",
            Statement::DropSchema => "drop.sql",
            Statement::CreateIndex => "create_index.sql",
            Statement::GetCompany => "get.sql",
            Statement::MergeJson => "update.sql",
            Statement::AppendPartners => "add_partners.sql",
            Statement::MetaSave => "meta_save.sql",
            Statement::MetaRead => "meta_read.sql",
        }
    }

    fn template(self) -> &'static str {
        match self {
            Statement::CreateSchema => include_str!("../sql/create.sql"),
            Statement::DropSchema => include_str!("../sql/drop.sql"),
            Statement::CreateIndex => include_str!("../sql/create_index.sql"),
            Statement::GetCompany => include_str!("../sql/get.sql"),
            Statement::MergeJson => include_str!("../sql/update.sql"),
            Statement::AppendPartners => include_str!("../sql/add_partners.sql"),
            Statement::MetaSave => include_str!("../sql/meta_save.sql"),
            Statement::MetaRead => include_str!("../sql/meta_read.sql"),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Immutable set of rendered statements, built whole or not at all
#[derive(Debug, Clone)]
pub struct Catalog {
    rendered: Vec<String>,
}

impl Catalog {
    /// Render every built-in template against `naming`
    pub fn load(naming: &Naming) -> Result<Self> {
        let templates: Vec<(&str, &str)> = Statement::ALL
            .iter()
            .map(|s| (s.name(), s.template()))
            .collect();
        let mut map = render(&templates, naming)?;

        let mut rendered = Vec::with_capacity(Statement::ALL.len());
        for statement in Statement::ALL {
            let sql = map.remove(statement.name()).ok_or_else(|| Error::Template {
                name: statement.name().to_string(),
                reason: "template missing from the rendered set".to_string(),
            })?;
            debug_assert_eq!(rendered.len(), statement.index());
            rendered.push(sql);
        }
        Ok(Catalog { rendered })
    }

    /// Rendered SQL of `statement`
    pub fn statement(&self, statement: Statement) -> &str {
        &self.rendered[statement.index()]
    }
}

/// Render a set of named templates. Fails on the first template that cannot
/// be parsed or rendered.
pub fn render(templates: &[(&str, &str)], naming: &Naming) -> Result<HashMap<String, String>> {
    for (label, value) in naming.names() {
        if !is_identifier(value) {
            return Err(Error::Template {
                name: label.to_string(),
                reason: format!("{:?} is not a plain SQL identifier", value),
            });
        }
    }

    let mut out = HashMap::with_capacity(templates.len());
    for (name, text) in templates {
        let sql = render_one(text, naming).map_err(|reason| Error::Template {
            name: name.to_string(),
            reason,
        })?;
        out.insert(name.to_string(), sql);
    }
    Ok(out)
}

fn render_one(text: &str, naming: &Naming) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| format!("unclosed placeholder at byte {}", text.len() - rest.len() + start))?;
        let key = after[..end].trim();
        if key.is_empty() {
            return Err("empty placeholder".to_string());
        }
        let value = naming
            .lookup(key)
            .ok_or_else(|| format!("unknown placeholder {:?}", key))?;
        out.push_str(&value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out.trim_end().to_string())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
