// Connection Tests - state machine and socket driver

mod manager_tests;
