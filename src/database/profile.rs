use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::profile::{FacultyProfile, Profile, ProfileTable, StudentProfile};
use uuid::Uuid;

/// Persistence for onboarding profiles, one logical table per role.
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` means the user has not completed onboarding yet.
    async fn fetch_profile(&self, table: ProfileTable, id: &Uuid) -> Result<Option<Profile>, AppError>;
    /// Inserts or replaces the row keyed by `id` in the table matching the profile's role.
    async fn upsert_profile(&self, id: &Uuid, profile: &Profile) -> Result<(), AppError>;
}

#[async_trait::async_trait]
impl ProfileStore for PostgresRepository {
    async fn fetch_profile(&self, table: ProfileTable, id: &Uuid) -> Result<Option<Profile>, AppError> {
        let profile = match table {
            ProfileTable::StudentProfiles => sqlx::query_as::<_, StudentProfile>(
                r#"
                SELECT name, roll_number, class, year, department, phone, address, parent_name, parent_phone
                FROM student_profiles
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::db("Failed to fetch student profile", e))?
            .map(Profile::Student),
            ProfileTable::FacultyProfiles => sqlx::query_as::<_, FacultyProfile>(
                r#"
                SELECT name, employee_id, department, designation, phone, address,
                       qualification, experience, assigned_classes, current_class
                FROM faculty_profiles
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::db("Failed to fetch faculty profile", e))?
            .map(Profile::Faculty),
        };

        Ok(profile)
    }

    async fn upsert_profile(&self, id: &Uuid, profile: &Profile) -> Result<(), AppError> {
        match profile {
            Profile::Student(student) => {
                sqlx::query(
                    r#"
                    INSERT INTO student_profiles (
                        id, name, roll_number, class, year, department, phone, address, parent_name, parent_phone
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    ON CONFLICT (id)
                    DO UPDATE SET
                        name = EXCLUDED.name,
                        roll_number = EXCLUDED.roll_number,
                        class = EXCLUDED.class,
                        year = EXCLUDED.year,
                        department = EXCLUDED.department,
                        phone = EXCLUDED.phone,
                        address = EXCLUDED.address,
                        parent_name = EXCLUDED.parent_name,
                        parent_phone = EXCLUDED.parent_phone,
                        updated_at = now()
                    "#,
                )
                .bind(id)
                .bind(&student.name)
                .bind(&student.roll_number)
                .bind(&student.class_name)
                .bind(&student.year)
                .bind(&student.department)
                .bind(&student.phone)
                .bind(&student.address)
                .bind(&student.parent_name)
                .bind(&student.parent_phone)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::db("Failed to upsert student profile", e))?;
            }
            Profile::Faculty(faculty) => {
                sqlx::query(
                    r#"
                    INSERT INTO faculty_profiles (
                        id, name, employee_id, department, designation, phone, address,
                        qualification, experience, assigned_classes, current_class
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    ON CONFLICT (id)
                    DO UPDATE SET
                        name = EXCLUDED.name,
                        employee_id = EXCLUDED.employee_id,
                        department = EXCLUDED.department,
                        designation = EXCLUDED.designation,
                        phone = EXCLUDED.phone,
                        address = EXCLUDED.address,
                        qualification = EXCLUDED.qualification,
                        experience = EXCLUDED.experience,
                        assigned_classes = EXCLUDED.assigned_classes,
                        current_class = EXCLUDED.current_class,
                        updated_at = now()
                    "#,
                )
                .bind(id)
                .bind(&faculty.name)
                .bind(&faculty.employee_id)
                .bind(&faculty.department)
                .bind(&faculty.designation)
                .bind(&faculty.phone)
                .bind(&faculty.address)
                .bind(&faculty.qualification)
                .bind(&faculty.experience)
                .bind(&faculty.assigned_classes)
                .bind(&faculty.current_class)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::db("Failed to upsert faculty profile", e))?;
            }
        }

        Ok(())
    }
}
