use crate::models::role::Role;
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::collections::HashSet;
use validator::{Validate, ValidationError, ValidationErrors};

/// Logical table a profile row lives in, one per role.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ProfileTable {
    StudentProfiles,
    FacultyProfiles,
}

impl ProfileTable {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Student => ProfileTable::StudentProfiles,
            Role::Faculty => ProfileTable::FacultyProfiles,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProfileTable::StudentProfiles => "student_profiles",
            ProfileTable::FacultyProfiles => "faculty_profiles",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Validate, JsonSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    #[validate(custom(function = "required_text"))]
    pub name: String,
    #[validate(custom(function = "required_text"))]
    pub roll_number: String,
    #[serde(rename = "class")]
    #[sqlx(rename = "class")]
    #[validate(custom(function = "required_text"))]
    pub class_name: String,
    #[validate(custom(function = "required_text"))]
    pub year: String,
    #[validate(custom(function = "required_text"))]
    pub department: String,
    #[validate(custom(function = "required_text"))]
    pub phone: String,
    #[validate(custom(function = "required_text"))]
    pub address: String,
    #[validate(custom(function = "required_text"))]
    pub parent_name: String,
    #[validate(custom(function = "required_text"))]
    pub parent_phone: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Validate, JsonSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_class_assignment"))]
pub struct FacultyProfile {
    #[validate(custom(function = "required_text"))]
    pub name: String,
    #[validate(custom(function = "required_text"))]
    pub employee_id: String,
    #[validate(custom(function = "required_text"))]
    pub department: String,
    #[validate(custom(function = "required_text"))]
    pub designation: String,
    #[validate(custom(function = "required_text"))]
    pub phone: String,
    #[validate(custom(function = "required_text"))]
    pub address: String,
    #[validate(custom(function = "required_text"))]
    pub qualification: String,
    #[validate(custom(function = "required_text"))]
    pub experience: String,
    #[serde(default)]
    pub assigned_classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_class: Option<String>,
}

/// A completed onboarding record, tagged by the role it belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Profile {
    Student(StudentProfile),
    Faculty(FacultyProfile),
}

impl Profile {
    pub fn role(&self) -> Role {
        match self {
            Profile::Student(_) => Role::Student,
            Profile::Faculty(_) => Role::Faculty,
        }
    }

    pub fn table(&self) -> ProfileTable {
        ProfileTable::for_role(self.role())
    }

    pub fn name(&self) -> &str {
        match self {
            Profile::Student(profile) => &profile.name,
            Profile::Faculty(profile) => &profile.name,
        }
    }

    pub fn current_class(&self) -> Option<&str> {
        match self {
            Profile::Student(_) => None,
            Profile::Faculty(profile) => profile.current_class.as_deref(),
        }
    }

    /// Blank `currentClass` submitted by a form means "no class selected".
    pub fn normalized(self) -> Self {
        match self {
            Profile::Faculty(mut profile) => {
                if profile.current_class.as_deref().is_some_and(|class| class.trim().is_empty()) {
                    profile.current_class = None;
                }
                Profile::Faculty(profile)
            }
            student => student,
        }
    }
}

impl Validate for Profile {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Profile::Student(profile) => profile.validate(),
            Profile::Faculty(profile) => profile.validate(),
        }
    }
}

fn required_text(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required"));
    }
    Ok(())
}

fn validate_class_assignment(profile: &FacultyProfile) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for class in &profile.assigned_classes {
        if class.trim().is_empty() {
            return Err(ValidationError::new("assigned_class_must_not_be_blank"));
        }
        if !seen.insert(class.as_str()) {
            return Err(ValidationError::new("assigned_classes_must_be_unique"));
        }
    }

    if let Some(current) = &profile.current_class
        && !seen.contains(current.as_str())
    {
        return Err(ValidationError::new("current_class_must_be_assigned"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_faculty_profile, sample_student_profile};
    use proptest::prelude::*;

    #[test]
    fn sample_profiles_are_valid() {
        assert!(Profile::Student(sample_student_profile()).validate().is_ok());
        assert!(Profile::Faculty(sample_faculty_profile()).validate().is_ok());
    }

    #[test]
    fn blank_required_field_is_rejected() {
        let mut profile = sample_student_profile();
        profile.parent_phone = "   ".to_string();
        let errors = profile.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("parent_phone"));
    }

    #[test]
    fn duplicate_assigned_classes_are_rejected() {
        let mut profile = sample_faculty_profile();
        profile.assigned_classes = vec!["Class 10A".to_string(), "Class 10A".to_string()];
        profile.current_class = None;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn blank_current_class_normalizes_to_none() {
        let mut profile = sample_faculty_profile();
        profile.current_class = Some(String::new());
        let normalized = Profile::Faculty(profile).normalized();
        assert_eq!(normalized.current_class(), None);
        assert!(normalized.validate().is_ok());
    }

    #[test]
    fn profile_json_is_tagged_by_role() {
        let json = serde_json::to_value(Profile::Student(sample_student_profile())).unwrap();
        assert_eq!(json["role"], "student");
        assert_eq!(json["rollNumber"], "S-042");
        assert_eq!(json["class"], "Class 10A");

        let parsed: Profile = serde_json::from_value(serde_json::json!({
            "role": "faculty",
            "name": "Dr. Rao",
            "employeeId": "F-7",
            "department": "Science",
            "designation": "Professor",
            "phone": "555-0101",
            "address": "1 Campus Road",
            "qualification": "PhD",
            "experience": "12 years",
            "assignedClasses": ["Class 10A"],
            "currentClass": "Class 10A"
        }))
        .unwrap();
        assert_eq!(parsed.role(), Role::Faculty);
        assert_eq!(parsed.current_class(), Some("Class 10A"));
    }

    #[test]
    fn table_follows_role() {
        assert_eq!(ProfileTable::for_role(Role::Student).name(), "student_profiles");
        assert_eq!(Profile::Faculty(sample_faculty_profile()).table(), ProfileTable::FacultyProfiles);
    }

    proptest! {
        #[test]
        fn current_class_must_be_one_of_the_assigned(
            classes in proptest::collection::hash_set("Class [0-9]{2}[A-D]", 1..6),
            pick in any::<prop::sample::Index>(),
            stray in "Room [0-9]{3}",
        ) {
            let classes: Vec<String> = classes.into_iter().collect();
            let mut profile = sample_faculty_profile();
            profile.assigned_classes = classes.clone();

            profile.current_class = Some(pick.get(&classes).clone());
            prop_assert!(profile.validate().is_ok());

            profile.current_class = Some(stray);
            prop_assert!(profile.validate().is_err());
        }
    }
}
