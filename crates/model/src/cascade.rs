//! Fixed-size, role-tagged collection of classifier heads.

use crate::error::{ModelError, Result};
use crate::head::{Classifier, ClassifierHead};

/// The head after the final layer is the teacher; every other head is a
/// student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadRole {
    Student,
    Teacher,
}

#[derive(Debug)]
struct Slot<C> {
    role: HeadRole,
    head: C,
}

/// One head per backbone layer. The length is fixed at construction.
#[derive(Debug)]
pub struct Cascade<C = ClassifierHead> {
    slots: Vec<Slot<C>>,
}

impl<C: Classifier> Cascade<C> {
    pub fn new(heads: Vec<C>) -> Result<Self> {
        if heads.is_empty() {
            return Err(ModelError::Config(
                "a cascade needs at least one classifier head".into(),
            ));
        }
        let teacher = heads.len() - 1;
        let slots = heads
            .into_iter()
            .enumerate()
            .map(|(index, head)| Slot {
                role: if index == teacher {
                    HeadRole::Teacher
                } else {
                    HeadRole::Student
                },
                head,
            })
            .collect();
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn teacher_index(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn role(&self, index: usize) -> Result<HeadRole> {
        self.slot(index).map(|slot| slot.role)
    }

    pub fn head(&self, index: usize) -> Result<&C> {
        self.slot(index).map(|slot| &slot.head)
    }

    pub fn teacher(&self) -> &C {
        &self.slots[self.teacher_index()].head
    }

    /// Students in layer order, with their indices.
    pub fn students(&self) -> impl Iterator<Item = (usize, &C)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.role == HeadRole::Student)
            .map(|(index, slot)| (index, &slot.head))
    }

    fn slot(&self, index: usize) -> Result<&Slot<C>> {
        self.slots.get(index).ok_or_else(|| {
            ModelError::Config(format!(
                "head {index} out of range for a cascade of {}",
                self.slots.len()
            ))
        })
    }
}
