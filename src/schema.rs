use crate::element::Element;
use crate::error::{EbmlError, Result};

use std::borrow::Cow;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Master,
    UInt,
    Int,
    Float,
    String,
    Utf8,
    Binary,
    Date,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    UInt(u64),
    Int(i64),
    Float(f64),
    String(Cow<'static, str>),
    Date(i64),
}

impl DefaultValue {
    fn suits(&self, kind: ElementKind) -> bool {
        matches!(
            (self, kind),
            (Self::UInt(_), ElementKind::UInt)
                | (Self::Int(_), ElementKind::Int)
                | (Self::Float(_), ElementKind::Float)
                | (Self::String(_), ElementKind::String | ElementKind::Utf8)
                | (Self::Date(_), ElementKind::Date)
        )
    }
}

/// What the schema knows about one element ID.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDef {
    pub id: u32,
    pub name: Cow<'static, str>,
    pub kind: ElementKind,
    pub default: Option<DefaultValue>,
    pub mandatory: bool,
    pub multiple: bool,
    pub always_save: bool,
    pub unknown_size_allowed: bool,
}

macro_rules! def_constructors {
    ($($fn_name:ident => $kind:ident),* $(,)?) => {
        $(
            pub fn $fn_name(id: u32, name: impl Into<Cow<'static, str>>) -> Self {
                Self::new(id, name, ElementKind::$kind)
            }
        )*
    };
}

impl ElementDef {
    pub fn new(id: u32, name: impl Into<Cow<'static, str>>, kind: ElementKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            default: None,
            mandatory: false,
            multiple: false,
            always_save: false,
            unknown_size_allowed: false,
        }
    }

    def_constructors!(
        master => Master,
        uint => UInt,
        int => Int,
        float => Float,
        string => String,
        utf8 => Utf8,
        binary => Binary,
        date => Date,
    );

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn always_save(mut self) -> Self {
        self.always_save = true;
        self
    }

    pub fn unknown_size_allowed(mut self) -> Self {
        self.unknown_size_allowed = true;
        self
    }
}

/// The table of known element IDs and where each may appear.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    doc_type: String,
    defs: HashMap<u32, ElementDef>,
    // master ID -> child IDs in declaration order
    children: HashMap<u32, Vec<u32>>,
    roots: Vec<u32>,
    globals: Vec<u32>,
}

impl Schema {
    pub fn new(doc_type: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            ..Self::default()
        }
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    /// Registers `def` under `parent` (`None` for the top level).
    ///
    /// Defining an already known ID again adds another parent for it; the kinds must agree.
    pub fn define(&mut self, parent: Option<u32>, def: ElementDef) -> Result<()> {
        if let Some(default) = &def.default {
            if !default.suits(def.kind) {
                return Err(EbmlError::Schema(format!(
                    "default {:?} does not suit {:?} element {}",
                    default, def.kind, def.name
                )));
            }
        }
        if let Some(parent) = parent {
            match self.defs.get(&parent) {
                Some(p) if p.kind == ElementKind::Master => {}
                Some(_) => return Err(EbmlError::NotAMaster { id: parent }),
                None if parent == def.id && def.kind == ElementKind::Master => {}
                None => return Err(EbmlError::UnknownElement { id: parent }),
            }
        }
        if let Some(known) = self.defs.get(&def.id) {
            if known.kind != def.kind {
                return Err(EbmlError::Schema(format!(
                    "element {:#X} defined as both {:?} and {:?}",
                    def.id, known.kind, def.kind
                )));
            }
        }

        self.insert(parent, def);
        Ok(())
    }

    pub fn define_global(&mut self, def: ElementDef) -> Result<()> {
        let id = def.id;
        self.define(None, def)?;
        self.roots.retain(|&root| root != id);
        if !self.globals.contains(&id) {
            self.globals.push(id);
        }
        Ok(())
    }

    // for tables known to be consistent
    pub(crate) fn insert(&mut self, parent: Option<u32>, def: ElementDef) {
        let id = def.id;
        let siblings = match parent {
            Some(parent) => self.children.entry(parent).or_default(),
            None => &mut self.roots,
        };
        if !siblings.contains(&id) {
            siblings.push(id);
        }
        self.defs.entry(id).or_insert(def);
    }

    pub(crate) fn insert_global(&mut self, def: ElementDef) {
        if !self.globals.contains(&def.id) {
            self.globals.push(def.id);
        }
        self.defs.entry(def.id).or_insert(def);
    }

    pub fn get(&self, id: u32) -> Option<&ElementDef> {
        self.defs.get(&id)
    }

    pub fn is_known(&self, id: u32) -> bool {
        self.defs.contains_key(&id)
    }

    pub fn is_global(&self, id: u32) -> bool {
        self.globals.contains(&id)
    }

    pub fn roots(&self) -> &[u32] {
        &self.roots
    }

    pub fn children_of(&self, parent: u32) -> &[u32] {
        self.children.get(&parent).map_or(&[], Vec::as_slice)
    }

    /// Whether `id` may appear directly below `parent` (`None` for the top level).
    pub fn accepts(&self, parent: Option<u32>, id: u32) -> bool {
        self.is_global(id)
            || match parent {
                Some(parent) => self.children_of(parent).contains(&id),
                None => self.roots.contains(&id),
            }
    }

    /// Whether `id` ends an unknown-size `master`: a known element that cannot be its child.
    pub fn ends_unknown_size(&self, master: u32, id: u32) -> bool {
        self.is_known(id) && !self.accepts(Some(master), id)
    }

    /// Builds element `id` together with its mandatory children that have a default,
    /// and its mandatory masters (recursively).
    pub fn create(&self, id: u32) -> Result<Element> {
        let mut creating = Vec::new();
        self.create_guarded(id, &mut creating)
    }

    fn create_guarded(&self, id: u32, creating: &mut Vec<u32>) -> Result<Element> {
        let def = self.get(id).ok_or(EbmlError::UnknownElement { id })?;
        let mut element = Element::from_def(def);
        if def.kind != ElementKind::Master {
            return Ok(element);
        }

        creating.push(id);
        let mut children = Vec::new();
        for child_def in self.children_of(id).iter().filter_map(|&c| self.get(c)) {
            let wanted = child_def.mandatory
                && (child_def.default.is_some() || child_def.kind == ElementKind::Master);
            // recursive masters stop at their first level
            if wanted && !creating.contains(&child_def.id) {
                children.push(self.create_guarded(child_def.id, creating)?);
            }
        }
        creating.pop();

        if let Some(list) = element.children_mut() {
            *list = children;
        }
        Ok(element)
    }

    fn rank(&self, parent: u32, element: &Element) -> Option<usize> {
        if element.is_trailing() {
            return Some(usize::MAX);
        }
        self.children_of(parent).iter().position(|&id| id == element.id())
    }

    /// Adds child `id` to `parent` at its declared position and returns it.
    ///
    /// A child that may appear only once and already exists is returned as is.
    pub fn add_child<'a>(&self, parent: &'a mut Element, id: u32) -> Result<&'a mut Element> {
        let parent_id = parent.id();
        if !parent.payload().is_master() {
            return Err(EbmlError::NotAMaster { id: parent_id });
        }
        if !self.accepts(Some(parent_id), id) {
            return Err(EbmlError::InvalidChild {
                parent: parent_id,
                child: id,
            });
        }
        let def = self.get(id).ok_or(EbmlError::UnknownElement { id })?;

        let index = {
            let children = parent.children();
            match children.iter().position(|c| c.id() == id) {
                Some(existing) if !def.multiple => Some(existing),
                _ => None,
            }
        };
        let index = match index {
            Some(existing) => existing,
            None => {
                let child = self.create(id)?;
                let rank = self.rank(parent_id, &child);
                let position = {
                    let children = parent.children();
                    children
                        .iter()
                        .position(|c| match (self.rank(parent_id, c), rank) {
                            (Some(theirs), Some(ours)) => theirs > ours,
                            _ => false,
                        })
                        .or_else(|| children.iter().position(Element::is_trailing))
                        .unwrap_or(children.len())
                };
                match parent.children_mut() {
                    Some(children) => children.insert(position, child),
                    None => return Err(EbmlError::NotAMaster { id: parent_id }),
                }
                position
            }
        };

        parent
            .children_mut()
            .and_then(|children| children.get_mut(index))
            .ok_or(EbmlError::NotAMaster { id: parent_id })
    }
}
