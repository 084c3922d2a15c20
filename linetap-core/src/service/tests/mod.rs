mod capture_tests;
