mod dispatcher_tests;
mod retry_tests;
