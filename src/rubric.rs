use serde::Serialize;

use crate::error::GradeError;
use crate::models::Assignment;

/// Ordered, id-unique set of assignments that defines a course's final grade.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rubric {
    assignments: Vec<Assignment>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentUpdate {
    pub name: Option<String>,
    pub max_score: Option<f64>,
    pub weight: Option<f64>,
}

impl Rubric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_assignments(
        assignments: impl IntoIterator<Item = Assignment>,
    ) -> Result<Self, GradeError> {
        let mut rubric = Self::new();
        for assignment in assignments {
            rubric.add_assignment(assignment)?;
        }
        Ok(rubric)
    }

    pub fn add_assignment(&mut self, assignment: Assignment) -> Result<(), GradeError> {
        assignment.check()?;
        if self.position(&assignment.id).is_some() {
            return Err(GradeError::DuplicateAssignment(assignment.id));
        }
        self.assignments.push(assignment);
        Ok(())
    }

    /// Applies a partial update. The assignment is left untouched if the result would be invalid.
    pub fn edit_assignment(
        &mut self,
        id: &str,
        update: AssignmentUpdate,
    ) -> Result<&Assignment, GradeError> {
        let index = self
            .position(id)
            .ok_or_else(|| GradeError::UnknownAssignment(id.to_string()))?;

        let mut edited = self.assignments[index].clone();
        if let Some(name) = update.name {
            edited.name = name;
        }
        if let Some(max_score) = update.max_score {
            edited.max_score = max_score;
        }
        if let Some(weight) = update.weight {
            edited.weight = weight;
        }
        edited.check()?;

        self.assignments[index] = edited;
        Ok(&self.assignments[index])
    }

    pub fn remove_assignment(&mut self, id: &str) -> Result<Assignment, GradeError> {
        let index = self
            .position(id)
            .ok_or_else(|| GradeError::UnknownAssignment(id.to_string()))?;
        Ok(self.assignments.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.assignments.iter().position(|a| a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn weight_sum(&self) -> f64 {
        self.assignments.iter().map(|a| a.weight).sum()
    }

    pub fn validate(&self, tolerance: f64) -> Result<(), GradeError> {
        let sum = self.weight_sum();
        if (sum - 1.0).abs() > tolerance {
            return Err(GradeError::InvalidRubric { sum, tolerance });
        }
        Ok(())
    }
}
