pub(crate) mod annotations;
pub(crate) mod booklets;
pub(crate) mod copies;
pub(crate) mod drafts;
pub(crate) mod events;
pub(crate) mod exams;
pub(crate) mod locks;
pub(crate) mod ocr_results;
pub(crate) mod scores;
pub(crate) mod students;
pub(crate) mod tasks;
pub(crate) mod users;
