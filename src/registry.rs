//! Versioned requirement registry with its dependency graph.
//!
//! The graph is built once at load time: requirements live in an arena
//! indexed by id, edges are canonical and deduplicated, and connected
//! components are precomputed so the runner can join per component.

use std::collections::{BTreeSet, HashMap};

use regex::Regex;
use thiserror::Error;

use crate::models::{DependencyEdge, FieldKind, Requirement};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry version must not be empty")]
    EmptyVersion,

    #[error("Duplicate requirement id: {0}")]
    DuplicateId(String),

    #[error("Requirement {from} references unknown requirement {to}")]
    DanglingEdge { from: String, to: String },

    #[error("Requirement {0} lists itself as related")]
    SelfEdge(String),

    #[error("Requirement {id} has an invalid identifier format: {reason}")]
    InvalidFormat { id: String, reason: String },
}

/// Compiled identifier format. `search` finds candidates in text,
/// `exact` decides whether a whole token has the declared shape.
#[derive(Debug, Clone)]
pub struct IdentifierFormat {
    pub search: Regex,
    pub exact: Regex,
    admits_years: bool,
}

/// Shapes next to a 4-digit year. A format that accepts any of them cannot
/// tell a year from an identifier.
const YEAR_NEIGHBOURS: [&str; 4] = ["201", "20190", "X019", "201X"];

impl IdentifierFormat {
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let exact = Regex::new(&format!("^(?:{pattern})$"))?;
        let admits_years = exact.is_match("2019") && !YEAR_NEIGHBOURS.iter().any(|s| exact.is_match(s));
        Ok(Self {
            search: Regex::new(pattern)?,
            exact,
            admits_years,
        })
    }

    /// True when the format matches a bare year and none of its neighbouring
    /// shapes, so a year-shaped token is a deliberate identifier.
    pub fn admits_years(&self) -> bool {
        self.admits_years
    }

    pub fn matches_exactly(&self, token: &str) -> bool {
        self.exact.is_match(token)
    }
}

/// A connected set of requirements; the unit of the validation join barrier.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub members: Vec<String>,
    pub edges: Vec<DependencyEdge>,
}

#[derive(Debug)]
pub struct RequirementRegistry {
    version: String,
    requirements: Vec<Requirement>,
    index: HashMap<String, usize>,
    adjacency: Vec<Vec<usize>>,
    edges: Vec<DependencyEdge>,
    components: Vec<Component>,
    formats: HashMap<String, IdentifierFormat>,
}

impl RequirementRegistry {
    pub fn new(version: &str, requirements: Vec<Requirement>) -> Result<Self, RegistryError> {
        let version = version.trim();
        if version.is_empty() {
            return Err(RegistryError::EmptyVersion);
        }

        let mut index = HashMap::with_capacity(requirements.len());
        for (i, req) in requirements.iter().enumerate() {
            if index.insert(req.id.clone(), i).is_some() {
                return Err(RegistryError::DuplicateId(req.id.clone()));
            }
        }

        let mut edge_set: BTreeSet<DependencyEdge> = BTreeSet::new();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); requirements.len()];
        for (i, req) in requirements.iter().enumerate() {
            for related in &req.related {
                if *related == req.id {
                    return Err(RegistryError::SelfEdge(req.id.clone()));
                }
                let j = *index.get(related).ok_or_else(|| RegistryError::DanglingEdge {
                    from: req.id.clone(),
                    to: related.clone(),
                })?;
                if edge_set.insert(DependencyEdge::new(&req.id, related)) {
                    adjacency[i].push(j);
                    adjacency[j].push(i);
                }
            }
        }

        let mut formats = HashMap::new();
        for req in &requirements {
            if let Some(pattern) = &req.pattern.identifier_format {
                let format = IdentifierFormat::compile(pattern).map_err(|e| RegistryError::InvalidFormat {
                    id: req.id.clone(),
                    reason: e.to_string(),
                })?;
                formats.insert(req.id.clone(), format);
            } else if req.field() == FieldKind::Identifier {
                tracing::debug!(requirement_id = %req.id, "Identifier requirement without declared format");
            }
        }

        let edges: Vec<DependencyEdge> = edge_set.into_iter().collect();
        let components = connected_components(&requirements, &adjacency, &edges);

        tracing::debug!(
            version,
            requirements = requirements.len(),
            edges = edges.len(),
            components = components.len(),
            "Requirement registry loaded"
        );

        Ok(Self {
            version: version.to_string(),
            requirements,
            index,
            adjacency,
            edges,
            components,
            formats,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Requirement> {
        self.index.get(id).map(|&i| &self.requirements[i])
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn identifier_format(&self, id: &str) -> Option<&IdentifierFormat> {
        self.formats.get(id)
    }

    pub fn neighbors(&self, id: &str) -> Vec<&Requirement> {
        self.index
            .get(id)
            .map(|&i| self.adjacency[i].iter().map(|&j| &self.requirements[j]).collect())
            .unwrap_or_default()
    }
}

fn connected_components(
    requirements: &[Requirement],
    adjacency: &[Vec<usize>],
    edges: &[DependencyEdge],
) -> Vec<Component> {
    let mut seen = vec![false; requirements.len()];
    let mut components = Vec::new();

    for start in 0..requirements.len() {
        if seen[start] {
            continue;
        }
        let mut stack = vec![start];
        let mut members = Vec::new();
        seen[start] = true;
        while let Some(i) = stack.pop() {
            members.push(i);
            for &j in &adjacency[i] {
                if !seen[j] {
                    seen[j] = true;
                    stack.push(j);
                }
            }
        }
        members.sort_unstable();

        let ids: Vec<String> = members.iter().map(|&i| requirements[i].id.clone()).collect();
        let component_edges = edges
            .iter()
            .filter(|e| ids.contains(&e.from))
            .cloned()
            .collect();
        components.push(Component {
            members: ids,
            edges: component_edges,
        });
    }

    components
}
