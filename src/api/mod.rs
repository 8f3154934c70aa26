mod auth;
mod errors;
mod exams;
mod grading;
mod guards;
mod handlers;
mod identify;
mod router;
#[cfg(test)]
mod tests;
mod validation;

pub(crate) use router::router;
