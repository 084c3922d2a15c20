mod finalize_tests;
mod policy_tests;
mod rotation_tests;
