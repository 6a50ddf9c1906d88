//! Activity tree: arena of activity nodes for one task run

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use super::handler::ActivityHandlerRegistry;
use crate::definition::{ActivityDefinition, ActivityPath, DefinitionError};

/// Index of a node in its [`ActivityTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A node of the static definition tree
#[derive(Debug)]
pub struct Activity {
    path: ActivityPath,
    definition: Arc<ActivityDefinition>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local_root: bool,
}

impl Activity {
    pub fn path(&self) -> &ActivityPath {
        &self.path
    }

    /// Definition of this node; its children are separate nodes
    pub fn definition(&self) -> &ActivityDefinition {
        &self.definition
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in definition order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_composite(&self) -> bool {
        self.definition.is_composite()
    }

    /// Root of the subtree the current worker is responsible for
    pub fn is_local_root(&self) -> bool {
        self.local_root
    }
}

/// All activities of one task run
///
/// Owns every node; executions refer to nodes by [`NodeId`].
#[derive(Debug)]
pub struct ActivityTree {
    task_id: Uuid,
    nodes: Vec<Activity>,
    local_root: NodeId,
}

impl ActivityTree {
    /// Build and validate the tree of `root`
    ///
    /// Fails on unknown kinds, duplicate sibling identifiers, children under
    /// a leaf and work definitions the handler rejects.
    pub fn build(
        task_id: Uuid,
        root: &ActivityDefinition,
        registry: &ActivityHandlerRegistry,
    ) -> Result<Self, DefinitionError> {
        let mut tree = Self {
            task_id,
            nodes: Vec::new(),
            local_root: NodeId(0),
        };
        tree.add(root, ActivityPath::root(), None, registry)?;
        tree.nodes[0].local_root = true;
        Ok(tree)
    }

    fn add(
        &mut self,
        definition: &ActivityDefinition,
        path: ActivityPath,
        parent: Option<NodeId>,
        registry: &ActivityHandlerRegistry,
    ) -> Result<NodeId, DefinitionError> {
        definition.validate_identifier()?;

        if definition.is_composite() {
            definition.work_as::<crate::definition::CompositeWork>(&path)?;
            let mut seen = HashSet::new();
            for child in &definition.children {
                if !seen.insert(child.identifier.as_str()) {
                    return Err(DefinitionError::DuplicateIdentifier {
                        identifier: child.identifier.clone(),
                        parent: path.clone(),
                    });
                }
            }
        } else {
            if !definition.children.is_empty() {
                return Err(DefinitionError::ChildrenOnLeaf(path));
            }
            registry
                .require(&definition.kind, &path)?
                .validate(definition, &path)?;
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(Activity {
            path: path.clone(),
            definition: Arc::new(definition.without_children()),
            parent,
            children: Vec::new(),
            local_root: false,
        });

        for child in &definition.children {
            let child_id = self.add(child, path.child(child.identifier.clone()), Some(id), registry)?;
            self.nodes[id.0].children.push(child_id);
        }

        Ok(id)
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Activity {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in depth-first definition order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Activity)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    pub fn find(&self, path: &ActivityPath) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| &node.path == path)
            .map(NodeId)
    }

    pub fn require(&self, path: &ActivityPath) -> Result<NodeId, DefinitionError> {
        self.find(path)
            .ok_or_else(|| DefinitionError::PathNotFound(path.clone()))
    }

    /// Make the activity at `path` the subtree this worker executes
    pub fn set_local_root(&mut self, path: &ActivityPath) -> Result<NodeId, DefinitionError> {
        let id = self.require(path)?;
        self.nodes[self.local_root.0].local_root = false;
        self.nodes[id.0].local_root = true;
        self.local_root = id;
        Ok(id)
    }

    pub fn local_root(&self) -> NodeId {
        self.local_root
    }
}
