mod location_tests;
