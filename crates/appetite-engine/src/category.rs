//! Risk category tree.
//!
//! Categories are held in an arena with a parent index. Every traversal is
//! bounded by the configured depth, and building the tree rejects cycles,
//! dangling parents and trees deeper than the cap.

use crate::error::{AppetiteError, AppetiteResult};
use appetite_types::{Category, CategoryId};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CategoryTree {
    nodes: Vec<Category>,
    index: HashMap<CategoryId, usize>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    max_depth: usize,
}

impl CategoryTree {
    pub fn build(categories: Vec<Category>, max_depth: usize) -> AppetiteResult<Self> {
        let mut index = HashMap::with_capacity(categories.len());
        for (idx, category) in categories.iter().enumerate() {
            if index.insert(category.category_id.clone(), idx).is_some() {
                return Err(AppetiteError::Validation(format!(
                    "duplicate category {}",
                    category.category_id
                )));
            }
        }

        let mut parent = Vec::with_capacity(categories.len());
        let mut children = vec![Vec::new(); categories.len()];
        for (idx, category) in categories.iter().enumerate() {
            let parent_idx = match &category.parent_id {
                Some(parent_id) => Some(*index.get(parent_id).ok_or_else(|| {
                    AppetiteError::Validation(format!(
                        "category {} names unknown parent {}",
                        category.category_id, parent_id
                    ))
                })?),
                None => None,
            };
            if let Some(p) = parent_idx {
                children[p].push(idx);
            }
            parent.push(parent_idx);
        }

        let tree = Self {
            nodes: categories,
            index,
            parent,
            children,
            max_depth,
        };
        for idx in 0..tree.nodes.len() {
            tree.depth_of(idx)?;
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &CategoryId) -> Option<&Category> {
        self.index.get(id).map(|idx| &self.nodes[*idx])
    }

    /// Number of edges between the category and its root.
    pub fn depth(&self, id: &CategoryId) -> AppetiteResult<usize> {
        self.depth_of(self.slot(id)?)
    }

    /// Parent chain from the direct parent up to the root.
    pub fn ancestors(&self, id: &CategoryId) -> AppetiteResult<Vec<CategoryId>> {
        let mut out = Vec::new();
        let mut cursor = self.parent[self.slot(id)?];
        while let Some(idx) = cursor {
            out.push(self.nodes[idx].category_id.clone());
            cursor = self.parent[idx];
            if out.len() > self.max_depth {
                return Err(self.too_deep(id));
            }
        }
        Ok(out)
    }

    /// The category and all of its descendants, breadth first.
    pub fn subtree(&self, id: &CategoryId) -> AppetiteResult<Vec<CategoryId>> {
        let root = self.slot(id)?;
        let mut out = vec![self.nodes[root].category_id.clone()];
        let mut level = vec![root];
        let mut depth = 0;
        while !level.is_empty() {
            let next: Vec<usize> = level
                .iter()
                .flat_map(|idx| self.children[*idx].iter().copied())
                .collect();
            if next.is_empty() {
                break;
            }
            depth += 1;
            if depth > self.max_depth {
                return Err(self.too_deep(id));
            }
            out.extend(next.iter().map(|idx| self.nodes[*idx].category_id.clone()));
            level = next;
        }
        Ok(out)
    }

    fn slot(&self, id: &CategoryId) -> AppetiteResult<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| AppetiteError::NotFound(format!("category {}", id)))
    }

    fn depth_of(&self, idx: usize) -> AppetiteResult<usize> {
        let mut depth = 0;
        let mut cursor = self.parent[idx];
        while let Some(p) = cursor {
            depth += 1;
            if p == idx || depth > self.max_depth {
                return Err(AppetiteError::Validation(format!(
                    "category {} is part of a cycle or deeper than {} levels",
                    self.nodes[idx].category_id, self.max_depth
                )));
            }
            cursor = self.parent[p];
        }
        Ok(depth)
    }

    fn too_deep(&self, id: &CategoryId) -> AppetiteError {
        AppetiteError::Validation(format!(
            "category tree under {} exceeds {} levels",
            id, self.max_depth
        ))
    }
}
