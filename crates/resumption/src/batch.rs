//! The correlation tree that carries requests out of a task and responses back in

use crate::error::{TaskError, TaskResult};

/// A tree of values whose shape mirrors the composition of the task that produced it.
///
/// A task emits a `Batch` of requests when it suspends, and is resumed with a `Batch` of
/// responses of exactly the same shape. [`Batch::Abort`] is special: it can stand in for
/// any subtree and tells the receiving task to wind down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch<T> {
    Leaf(T),
    Branch2(Box<Batch<T>>, Box<Batch<T>>),
    BranchN(Vec<Batch<T>>),
    Abort,
}

impl<T> Batch<T> {
    pub fn branch2(left: Batch<T>, right: Batch<T>) -> Self {
        Batch::Branch2(Box::new(left), Box::new(right))
    }

    /// Short name of this node's variant, used in shape errors
    pub fn kind(&self) -> &'static str {
        match self {
            Batch::Leaf(_) => "leaf",
            Batch::Branch2(..) => "branch2",
            Batch::BranchN(_) => "branch-n",
            Batch::Abort => "abort",
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Batch::Abort)
    }

    /// Transform every leaf, preserving the shape exactly
    pub fn map<U, F>(self, mut f: F) -> Batch<U>
    where
        F: FnMut(T) -> U,
    {
        self.map_with(&mut f)
    }

    fn map_with<U, F>(self, f: &mut F) -> Batch<U>
    where
        F: FnMut(T) -> U,
    {
        match self {
            Batch::Leaf(value) => Batch::Leaf(f(value)),
            Batch::Branch2(left, right) => Batch::branch2(left.map_with(f), right.map_with(f)),
            Batch::BranchN(children) => {
                Batch::BranchN(children.into_iter().map(|child| child.map_with(f)).collect())
            }
            Batch::Abort => Batch::Abort,
        }
    }

    /// Transform every leaf by reference, preserving the shape exactly
    pub fn map_ref<U, F>(&self, mut f: F) -> Batch<U>
    where
        F: FnMut(&T) -> U,
    {
        self.map_ref_with(&mut f)
    }

    fn map_ref_with<U, F>(&self, f: &mut F) -> Batch<U>
    where
        F: FnMut(&T) -> U,
    {
        match self {
            Batch::Leaf(value) => Batch::Leaf(f(value)),
            Batch::Branch2(left, right) => {
                Batch::branch2(left.map_ref_with(f), right.map_ref_with(f))
            }
            Batch::BranchN(children) => {
                Batch::BranchN(children.iter().map(|child| child.map_ref_with(f)).collect())
            }
            Batch::Abort => Batch::Abort,
        }
    }

    /// Whether both trees have the same shape, ignoring leaf values
    pub fn same_shape<U>(&self, other: &Batch<U>) -> bool {
        match (self, other) {
            (Batch::Leaf(_), Batch::Leaf(_)) | (Batch::Abort, Batch::Abort) => true,
            (Batch::Branch2(l1, r1), Batch::Branch2(l2, r2)) => {
                l1.same_shape(l2) && r1.same_shape(r2)
            }
            (Batch::BranchN(c1), Batch::BranchN(c2)) => {
                c1.len() == c2.len() && c1.iter().zip(c2).all(|(a, b)| a.same_shape(b))
            }
            _ => false,
        }
    }

    /// Unwrap a leaf, failing with a shape error for any other variant.
    ///
    /// All three unwrapping methods turn an abort node into [`TaskError::Aborted`].
    pub fn into_leaf(self) -> TaskResult<T> {
        match self {
            Batch::Leaf(value) => Ok(value),
            Batch::Abort => Err(TaskError::Aborted),
            other => Err(TaskError::shape("leaf", other.kind())),
        }
    }

    /// Unwrap a binary branch, failing with a shape error for any other variant
    pub fn into_branch2(self) -> TaskResult<(Batch<T>, Batch<T>)> {
        match self {
            Batch::Branch2(left, right) => Ok((*left, *right)),
            Batch::Abort => Err(TaskError::Aborted),
            other => Err(TaskError::shape("branch2", other.kind())),
        }
    }

    /// Unwrap an n-ary branch that must have exactly `expected` children
    pub fn into_branch_n(self, expected: usize) -> TaskResult<Vec<Batch<T>>> {
        match self {
            Batch::BranchN(children) if children.len() == expected => Ok(children),
            Batch::BranchN(children) => Err(TaskError::shape(
                format!("branch-n with {expected} children"),
                format!("branch-n with {} children", children.len()),
            )),
            Batch::Abort => Err(TaskError::Aborted),
            other => Err(TaskError::shape("branch-n", other.kind())),
        }
    }

    /// Iterate over the leaves from left to right
    pub fn leaves(&self) -> Leaves<'_, T> {
        Leaves { stack: vec![self] }
    }

    /// Number of leaves in the tree
    pub fn len(&self) -> usize {
        self.leaves().count()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves().next().is_none()
    }
}

/// Left-to-right iterator over the leaves of a [`Batch`]
pub struct Leaves<'a, T> {
    stack: Vec<&'a Batch<T>>,
}

impl<'a, T> Iterator for Leaves<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                Batch::Leaf(value) => return Some(value),
                Batch::Branch2(left, right) => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
                Batch::BranchN(children) => self.stack.extend(children.iter().rev()),
                Batch::Abort => {}
            }
        }
        None
    }
}
