mod idle_tests;
